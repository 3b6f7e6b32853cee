//! Error types for certificate lifecycle management

use std::time::Duration;

use certpilot_common::CertificateId;
use thiserror::Error;

/// Errors raised when constructing a certificate
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Domain set is empty or contains a name that is not a bare domain
    #[error("invalid domains")]
    InvalidDomains,

    /// Contact email is not a valid address
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// Account key generation failed
    #[error("failed to generate account key: {0}")]
    KeyGeneration(String),
}

/// Errors from certificate storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors producing a domain-ownership challenge handler
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// No credentials have been stored for the challenge provider
    #[error("challenge provider credentials not configured")]
    MissingCredentials,

    /// Stored credentials are present but unusable
    #[error("invalid challenge provider credentials: {0}")]
    InvalidCredentials(String),

    /// The provider failed while presenting or cleaning up a challenge
    #[error("challenge provider error: {0}")]
    Provider(String),
}

/// Errors from the CA exchange
#[derive(Debug, Error)]
pub enum CaError {
    /// Account registration was refused or failed
    #[error("account registration failed: {0}")]
    Registration(String),

    /// Certificate order failed
    #[error("certificate order failed: {0}")]
    Obtain(String),

    /// The exchange did not finish in time
    #[error("CA exchange timed out after {0:?}")]
    Timeout(Duration),

    /// The CA answered but the bundle cannot be stored
    #[error("invalid certificate bundle: {0}")]
    InvalidBundle(String),

    /// The challenge handler failed during the exchange
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

/// Errors parsing stored key or certificate material
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    /// Nothing stored
    #[error("no {0} stored")]
    Empty(&'static str),

    /// Not a PEM document
    #[error("malformed PEM: {0}")]
    Pem(String),

    /// PEM block is not of an accepted type
    #[error("unsupported PEM block '{0}'")]
    UnsupportedBlock(String),

    /// The certificate's DER could not be parsed
    #[error("malformed certificate: {0}")]
    Certificate(String),
}

/// Errors from the blocking admission path
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// All workers are gone; nothing will drain the queue
    #[error("dispatcher queue is closed")]
    Closed,
}

/// Errors returned by the certificate service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected domain set or email
    #[error(transparent)]
    Validation(CertificateError),

    /// Key material could not be generated; not the caller's fault
    #[error("failed to generate key material: {0}")]
    KeyGeneration(String),

    /// CA account registration failed; nothing was stored
    #[error(transparent)]
    Registration(#[from] CaError),

    #[error("certificate {0} not found")]
    NotFound(CertificateId),

    #[error("certificate {0} has not been issued")]
    NotIssued(CertificateId),

    /// Missing or wrong secret
    #[error("secret does not match")]
    Unauthorized,

    /// The renew queue is full; the caller may retry later
    #[error("renew queue is full, try again later")]
    RateLimited,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CertificateError> for ServiceError {
    fn from(err: CertificateError) -> Self {
        match err {
            CertificateError::KeyGeneration(message) => ServiceError::KeyGeneration(message),
            other => ServiceError::Validation(other),
        }
    }
}

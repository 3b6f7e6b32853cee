//! CA client contract
//!
//! The wire protocol lives outside this crate. The engine only needs two
//! operations from a CA: account registration and certificate orders.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::challenge::ChallengeHandler;
use super::error::CaError;
use super::model::{AccountIdentity, Registration};

/// A certificate order
#[derive(Debug, Clone)]
pub struct ObtainRequest {
    /// Account the order is placed under
    pub account: AccountIdentity,
    /// Domains to certify; the first is the common name
    pub domains: Vec<String>,
    /// Request the issuer chain alongside the leaf
    pub bundle: bool,
    /// Existing PEM private key to reuse on renewal
    pub private_key: Option<Vec<u8>>,
}

/// Artifacts returned by a successful order
#[derive(Clone, Default)]
pub struct CertificateBundle {
    pub cert_url: String,
    pub cert_stable_url: String,
    pub private_key: Vec<u8>,
    pub certificate: Vec<u8>,
    pub issuer_certificate: Vec<u8>,
    /// Expiry reported by the CA, if the client knows it
    pub not_after: Option<DateTime<Utc>>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("cert_url", &self.cert_url)
            .field("certificate_len", &self.certificate.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Certificate authority operations
#[async_trait]
pub trait CaClient: Send + Sync {
    /// Register (or look up) the account with the CA
    async fn register(&self, account: &AccountIdentity) -> Result<Registration, CaError>;

    /// Order a certificate, proving domain ownership through `handler`
    async fn obtain(
        &self,
        request: ObtainRequest,
        handler: Arc<dyn ChallengeHandler>,
    ) -> Result<CertificateBundle, CaError>;
}

/// Account registration step
///
/// Split from [`CaClient`] so registration can be replaced on its own.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, account: &AccountIdentity) -> Result<Registration, CaError>;
}

/// Registers through a [`CaClient`]
pub struct ClientRegistrar {
    client: Arc<dyn CaClient>,
}

impl ClientRegistrar {
    pub fn new(client: Arc<dyn CaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Registrar for ClientRegistrar {
    async fn register(&self, account: &AccountIdentity) -> Result<Registration, CaError> {
        self.client.register(account).await
    }
}

//! Key and certificate material helpers
//!
//! Everything the engine needs to know about PEM blobs: generating account
//! keys and bearer secrets, checking that a stored private key is usable for
//! renewal, and reading the expiry out of an issued certificate.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::trace;

use super::error::{CertificateError, KeyMaterialError};

/// Bytes of entropy in a certificate secret
const SECRET_BYTES: usize = 16;

/// PEM block types accepted as a reusable private key
const PRIVATE_KEY_TAGS: &[&str] = &["PRIVATE KEY", "EC PRIVATE KEY", "RSA PRIVATE KEY"];

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Generate a fresh bearer secret.
///
/// 16 bytes from the OS RNG, base64url without padding.
pub fn new_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a P-256 ECDSA key for a CA account, PKCS#8 PEM encoded.
pub fn generate_account_key() -> Result<String, CertificateError> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
    Ok(key_pair.serialize_pem())
}

/// Parse a stored private key.
///
/// Only checks that the blob is a single PEM private key block with a body;
/// the CA client owns the actual key decoding.
pub fn parse_private_key(bytes: &[u8]) -> Result<pem::Pem, KeyMaterialError> {
    if bytes.is_empty() {
        return Err(KeyMaterialError::Empty("private key"));
    }

    let block = pem::parse(bytes).map_err(|e| KeyMaterialError::Pem(e.to_string()))?;

    if !PRIVATE_KEY_TAGS.contains(&block.tag()) {
        return Err(KeyMaterialError::UnsupportedBlock(block.tag().to_string()));
    }
    if block.contents().is_empty() {
        return Err(KeyMaterialError::Pem("empty key body".to_string()));
    }

    trace!(tag = block.tag(), "Parsed stored private key");
    Ok(block)
}

/// Read the notAfter of the first certificate in a PEM bundle.
pub fn certificate_not_after(bytes: &[u8]) -> Result<DateTime<Utc>, KeyMaterialError> {
    if bytes.is_empty() {
        return Err(KeyMaterialError::Empty("certificate"));
    }

    let block = pem::parse(bytes).map_err(|e| KeyMaterialError::Pem(e.to_string()))?;
    if block.tag() != CERTIFICATE_TAG {
        return Err(KeyMaterialError::UnsupportedBlock(block.tag().to_string()));
    }

    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| KeyMaterialError::Certificate(e.to_string()))?;

    let not_after = cert.validity().not_after.to_datetime().unix_timestamp();
    DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| KeyMaterialError::Certificate(format!("notAfter out of range: {not_after}")))
}

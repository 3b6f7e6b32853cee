//! Domain-ownership challenges
//!
//! [`ChallengeProviderSource`] turns stored provider credentials into a
//! [`ChallengeHandler`] for one exchange. [`PendingChallenges`] is a handler
//! that records DNS-01 TXT values so a separate DNS integration can publish
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::error::ChallengeError;

/// Label prepended to a domain for its DNS-01 TXT record
pub const DNS01_RECORD_PREFIX: &str = "_acme-challenge.";

/// Presents and removes domain-ownership proofs during a CA exchange
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    async fn present(&self, domain: &str, token: &str, key_auth: &str)
        -> Result<(), ChallengeError>;

    async fn cleanup(&self, domain: &str, token: &str, key_auth: &str)
        -> Result<(), ChallengeError>;
}

/// Produces a challenge handler from stored credentials
#[async_trait]
pub trait ChallengeProviderSource: Send + Sync {
    async fn new_dns_provider(&self) -> Result<Arc<dyn ChallengeHandler>, ChallengeError>;
}

/// Credentials for a DNS challenge provider
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeCredentials {
    pub auth_email: String,
    pub auth_key: String,
}

impl std::fmt::Debug for ChallengeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeCredentials")
            .field("auth_email", &self.auth_email)
            .field("auth_key", &"[redacted]")
            .finish()
    }
}

type HandlerFactory =
    dyn Fn(&ChallengeCredentials) -> Result<Arc<dyn ChallengeHandler>, ChallengeError> + Send + Sync;

/// Challenge source backed by operator-provided credentials
///
/// Credentials may be set or replaced at any time; each exchange builds a
/// fresh handler from whatever is stored when it starts.
pub struct CredentialChallengeSource {
    credentials: RwLock<Option<ChallengeCredentials>>,
    factory: Box<HandlerFactory>,
}

impl CredentialChallengeSource {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ChallengeCredentials) -> Result<Arc<dyn ChallengeHandler>, ChallengeError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            credentials: RwLock::new(None),
            factory: Box::new(factory),
        }
    }

    /// Store credentials, replacing any previous ones
    pub fn set_credentials(&self, credentials: ChallengeCredentials) {
        debug!(auth_email = %credentials.auth_email, "Stored challenge provider credentials");
        *self.credentials.write() = Some(credentials);
    }

    /// Forget stored credentials
    pub fn clear_credentials(&self) {
        *self.credentials.write() = None;
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.read().is_some()
    }
}

#[async_trait]
impl ChallengeProviderSource for CredentialChallengeSource {
    async fn new_dns_provider(&self) -> Result<Arc<dyn ChallengeHandler>, ChallengeError> {
        let credentials = self
            .credentials
            .read()
            .clone()
            .ok_or(ChallengeError::MissingCredentials)?;

        if credentials.auth_email.is_empty() || credentials.auth_key.is_empty() {
            return Err(ChallengeError::InvalidCredentials(
                "auth email and key must both be set".to_string(),
            ));
        }

        (self.factory)(&credentials)
    }
}

/// Compute the DNS-01 TXT value: `base64url(sha256(key_auth))`
pub fn compute_dns01_digest(key_auth: &str) -> String {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(key_auth.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// TXT record name for a domain, with any wildcard label removed
pub fn dns01_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{DNS01_RECORD_PREFIX}{base}")
}

/// Pending DNS-01 TXT records
///
/// Uses `DashMap` so the exchange and the publishing side can touch it
/// concurrently. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct PendingChallenges {
    /// Map of record name -> TXT values
    records: Arc<DashMap<String, Vec<String>>>,
}

impl PendingChallenges {
    pub fn new() -> Self {
        Self::default()
    }

    /// TXT values currently pending for a record name
    pub fn txt_values(&self, record_name: &str) -> Vec<String> {
        let result = self.records.get(record_name).map(|v| v.clone());
        if result.is_none() {
            trace!(record = %record_name, "No pending DNS-01 record");
        }
        result.unwrap_or_default()
    }

    /// Snapshot of every pending record
    pub fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&self) {
        let count = self.records.len();
        self.records.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared all pending DNS-01 records");
        }
    }
}

#[async_trait]
impl ChallengeHandler for PendingChallenges {
    async fn present(
        &self,
        domain: &str,
        _token: &str,
        key_auth: &str,
    ) -> Result<(), ChallengeError> {
        let name = dns01_record_name(domain);
        let value = compute_dns01_digest(key_auth);
        debug!(record = %name, "Registering DNS-01 challenge");

        // A wildcard and its base domain share one record name
        let mut values = self.records.entry(name).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
        Ok(())
    }

    async fn cleanup(
        &self,
        domain: &str,
        _token: &str,
        key_auth: &str,
    ) -> Result<(), ChallengeError> {
        let name = dns01_record_name(domain);
        let value = compute_dns01_digest(key_auth);

        let now_empty = match self.records.get_mut(&name) {
            Some(mut values) => {
                values.retain(|v| v != &value);
                values.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.records.remove_if(&name, |_, values| values.is_empty());
            debug!(record = %name, "Removed DNS-01 challenge");
        }
        Ok(())
    }
}

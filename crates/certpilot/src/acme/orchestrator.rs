//! CA exchange orchestration
//!
//! The [`Orchestrator`] ties the certificate store, the challenge provider
//! source and the CA client together. It runs first issuance
//! ([`trigger`](Orchestrator::trigger)) and renewal
//! ([`renew`](Orchestrator::renew)) and records every outcome on the stored
//! record. Neither operation returns an error: callers observe the result
//! through `issued`, `expiry` and `last_error`.
//!
//! # Concurrency
//!
//! At most one exchange per certificate runs at a time; a duplicate request
//! is logged and dropped. The result is committed under the record lock
//! against a fresh copy of the record, so a secret rotated during the
//! exchange is kept and a record deleted during the exchange stays deleted.

use std::sync::Arc;
use std::time::Duration;

use certpilot_common::CertificateId;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::challenge::ChallengeProviderSource;
use super::client::{CaClient, ClientRegistrar, ObtainRequest, Registrar};
use super::error::CaError;
use super::keys;
use super::locks::{InFlight, RecordLocks};
use super::model::{AccountIdentity, Certificate, IssuedMaterial, Registration};
use super::storage::CertificateStore;
use crate::metrics::{
    EngineMetrics, KIND_RENEW, KIND_TRIGGER, OUTCOME_FAILURE, OUTCOME_SKIPPED, OUTCOME_SUCCESS,
};

/// Default upper bound on one CA exchange
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeKind {
    Trigger,
    Renew,
}

impl ExchangeKind {
    fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Trigger => KIND_TRIGGER,
            ExchangeKind::Renew => KIND_RENEW,
        }
    }
}

/// Runs CA exchanges and records their outcome
pub struct Orchestrator {
    store: Arc<dyn CertificateStore>,
    challenges: Arc<dyn ChallengeProviderSource>,
    client: Arc<dyn CaClient>,
    registrar: Arc<dyn Registrar>,
    exchange_timeout: Duration,
    locks: RecordLocks,
    in_flight: InFlight,
    metrics: Option<EngineMetrics>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        challenges: Arc<dyn ChallengeProviderSource>,
        client: Arc<dyn CaClient>,
    ) -> Self {
        let registrar = Arc::new(ClientRegistrar::new(Arc::clone(&client)));
        Self {
            store,
            challenges,
            client,
            registrar,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            locks: RecordLocks::new(),
            in_flight: InFlight::new(),
            metrics: None,
        }
    }

    /// Replace the account registration step
    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    /// Record locks shared with every other writer of the store
    pub fn locks(&self) -> &RecordLocks {
        &self.locks
    }

    /// Register a CA account
    pub async fn register(&self, account: &AccountIdentity) -> Result<Registration, CaError> {
        debug!(email = %account.email, "Registering CA account");
        self.registrar.register(account).await
    }

    /// First issuance of a stored certificate
    pub async fn trigger(&self, id: &CertificateId) {
        let Some(_claim) = self.in_flight.try_begin(id) else {
            self.drop_duplicate(ExchangeKind::Trigger, id);
            return;
        };

        let cert = match self.store.cert(id).await {
            Ok(Some(cert)) => cert,
            Ok(None) => {
                warn!(cert_id = %id, "Certificate to issue not found, dropping request");
                return;
            }
            Err(e) => {
                error!(cert_id = %id, error = %e, "Failed to load certificate for issuance");
                return;
            }
        };

        info!(
            cert_id = %id,
            common_name = %cert.common_name,
            domains = ?cert.domains,
            "Starting certificate issuance"
        );

        let request = ObtainRequest {
            account: cert.account(),
            domains: cert.domains.clone(),
            bundle: true,
            private_key: None,
        };
        let outcome = self.exchange(request).await;
        self.commit(ExchangeKind::Trigger, id, outcome).await;
    }

    /// Renew an issued certificate, reusing its private key
    pub async fn renew(&self, cert: &Certificate) {
        let id = &cert.id;
        let Some(_claim) = self.in_flight.try_begin(id) else {
            self.drop_duplicate(ExchangeKind::Renew, id);
            return;
        };

        if let Err(e) = keys::parse_private_key(&cert.private_key) {
            warn!(cert_id = %id, error = %e, "Stored private key is unusable, not contacting CA");
            self.commit(
                ExchangeKind::Renew,
                id,
                Err(format!("cannot reuse private key: {e}")),
            )
            .await;
            return;
        }

        info!(
            cert_id = %id,
            common_name = %cert.common_name,
            expiry = ?cert.expiry,
            "Starting certificate renewal"
        );

        let request = ObtainRequest {
            account: cert.account(),
            domains: cert.domains.clone(),
            bundle: true,
            private_key: Some(cert.private_key.clone()),
        };
        let outcome = self.exchange(request).await;
        self.commit(ExchangeKind::Renew, id, outcome).await;
    }

    fn drop_duplicate(&self, kind: ExchangeKind, id: &CertificateId) {
        debug!(
            cert_id = %id,
            kind = kind.as_str(),
            "Exchange already in flight, dropping duplicate request"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_exchange(kind.as_str(), OUTCOME_SKIPPED);
        }
    }

    /// Challenge handler, CA order and bundle validation
    async fn exchange(&self, request: ObtainRequest) -> Result<IssuedMaterial, String> {
        let handler = self
            .challenges
            .new_dns_provider()
            .await
            .map_err(|e| CaError::from(e).to_string())?;

        let bundle = tokio::time::timeout(self.exchange_timeout, self.client.obtain(request, handler))
            .await
            .map_err(|_| CaError::Timeout(self.exchange_timeout).to_string())?
            .map_err(|e| e.to_string())?;

        IssuedMaterial::try_from(bundle).map_err(|e| e.to_string())
    }

    /// Apply an exchange outcome to the latest stored record
    async fn commit(
        &self,
        kind: ExchangeKind,
        id: &CertificateId,
        outcome: Result<IssuedMaterial, String>,
    ) {
        let succeeded = outcome.is_ok();
        if let Some(metrics) = &self.metrics {
            let label = if succeeded { OUTCOME_SUCCESS } else { OUTCOME_FAILURE };
            metrics.record_exchange(kind.as_str(), label);
        }

        let _guard = self.locks.lock(id).await;

        let mut cert = match self.store.cert(id).await {
            Ok(Some(cert)) => cert,
            Ok(None) => {
                warn!(
                    cert_id = %id,
                    kind = kind.as_str(),
                    "Certificate deleted during exchange, discarding result"
                );
                return;
            }
            Err(e) => {
                error!(cert_id = %id, error = %e, "Failed to reload certificate, result lost");
                return;
            }
        };

        match outcome {
            Ok(material) => {
                let expiry = material.expiry;
                cert.apply_issuance(material);
                info!(
                    cert_id = %id,
                    common_name = %cert.common_name,
                    kind = kind.as_str(),
                    expiry = %expiry,
                    "Certificate issued"
                );
            }
            Err(message) => {
                warn!(
                    cert_id = %id,
                    common_name = %cert.common_name,
                    kind = kind.as_str(),
                    error = %message,
                    "Certificate exchange failed"
                );
                cert.record_failure(message);
            }
        }
        cert.mod_time = Utc::now();

        if let Err(e) = self.store.save_cert(&cert).await {
            error!(cert_id = %id, error = %e, "Failed to persist exchange outcome");
        }
    }
}

//! Fakes shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use certpilot_common::CertificateId;

use crate::acme::{
    generate_account_key, AccountIdentity, CaClient, CaError, Certificate, CertificateBundle,
    CertificateStore, ChallengeError, ChallengeHandler, ChallengeProviderSource,
    MemoryCertificateStore, ObtainRequest, PendingChallenges, Registration, StorageError,
};

pub const FAKE_CERT_PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nZmFrZQ==\n-----END CERTIFICATE-----\n";
pub const FAKE_ISSUER_PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\naXNzdWVy\n-----END CERTIFICATE-----\n";

/// What the fake CA does with an order
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Issue a bundle valid for the given duration
    Issue(Duration),
    /// Fail the order
    Fail(String),
    /// Never answer
    Hang,
}

/// Scriptable CA client
pub struct FakeCaClient {
    behavior: Mutex<FakeBehavior>,
    register_result: Mutex<Result<(), String>>,
    requests: Mutex<Vec<ObtainRequest>>,
    obtain_calls: AtomicUsize,
    register_calls: AtomicUsize,
    /// When set, each order waits for a permit before answering
    gate: Option<Arc<Semaphore>>,
}

impl FakeCaClient {
    pub fn issuing(valid_for: Duration) -> Self {
        Self {
            behavior: Mutex::new(FakeBehavior::Issue(valid_for)),
            register_result: Mutex::new(Ok(())),
            requests: Mutex::new(Vec::new()),
            obtain_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        let client = Self::issuing(Duration::days(90));
        client.set_behavior(FakeBehavior::Fail(message.to_string()));
        client
    }

    pub fn gated(valid_for: Duration, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::issuing(valid_for)
        }
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn refuse_registration(&self, message: &str) {
        *self.register_result.lock() = Err(message.to_string());
    }

    pub fn obtain_calls(&self) -> usize {
        self.obtain_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ObtainRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CaClient for FakeCaClient {
    async fn register(&self, account: &AccountIdentity) -> Result<Registration, CaError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.register_result.lock().clone();
        result
            .map(|()| Registration {
                uri: format!("https://ca.test/acct/{}", account.email),
                body: serde_json::json!({ "status": "valid" }),
            })
            .map_err(CaError::Registration)
    }

    async fn obtain(
        &self,
        request: ObtainRequest,
        _handler: Arc<dyn ChallengeHandler>,
    ) -> Result<CertificateBundle, CaError> {
        self.obtain_calls.fetch_add(1, Ordering::SeqCst);
        let private_key = request.private_key.clone();
        self.requests.lock().push(request);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| CaError::Obtain(e.to_string()))?;
            permit.forget();
        }

        let behavior = self.behavior.lock().clone();
        match behavior {
            FakeBehavior::Issue(valid_for) => {
                let private_key = match private_key {
                    Some(key) => key,
                    None => generate_account_key()
                        .map_err(|e| CaError::Obtain(e.to_string()))?
                        .into_bytes(),
                };
                Ok(CertificateBundle {
                    cert_url: "https://ca.test/cert/1".to_string(),
                    cert_stable_url: "https://ca.test/cert/1/stable".to_string(),
                    private_key,
                    certificate: FAKE_CERT_PEM.to_vec(),
                    issuer_certificate: FAKE_ISSUER_PEM.to_vec(),
                    not_after: Some(Utc::now() + valid_for),
                })
            }
            FakeBehavior::Fail(message) => Err(CaError::Obtain(message)),
            FakeBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Challenge source that always (or never) yields a handler
pub struct StaticChallengeSource {
    available: bool,
}

impl StaticChallengeSource {
    pub fn available() -> Self {
        Self { available: true }
    }

    pub fn missing() -> Self {
        Self { available: false }
    }
}

#[async_trait]
impl ChallengeProviderSource for StaticChallengeSource {
    async fn new_dns_provider(&self) -> Result<Arc<dyn ChallengeHandler>, ChallengeError> {
        if self.available {
            Ok(Arc::new(PendingChallenges::new()))
        } else {
            Err(ChallengeError::MissingCredentials)
        }
    }
}

/// Memory store whose saves can be held at a gate
///
/// Once [`hold_saves`](Self::hold_saves) is called, every `save_cert` waits
/// for a permit before writing.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryCertificateStore,
    gate: Mutex<Option<Arc<Semaphore>>>,
    parked: AtomicUsize,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold subsequent saves until permits are added to the returned gate
    pub fn hold_saves(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Saves currently waiting at the gate
    pub fn parked(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl CertificateStore for GatedStore {
    async fn all_certs(&self) -> Result<Vec<Certificate>, StorageError> {
        self.inner.all_certs().await
    }

    async fn cert(&self, id: &CertificateId) -> Result<Option<Certificate>, StorageError> {
        self.inner.cert(id).await
    }

    async fn save_cert(&self, cert: &Certificate) -> Result<(), StorageError> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.parked.fetch_add(1, Ordering::SeqCst);
            let permit = gate
                .acquire()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()));
            self.parked.fetch_sub(1, Ordering::SeqCst);
            permit?.forget();
        }
        self.inner.save_cert(cert).await
    }

    async fn delete_cert(&self, id: &CertificateId) -> Result<(), StorageError> {
        self.inner.delete_cert(id).await
    }

    async fn delete_all_certs(&self) -> Result<(), StorageError> {
        self.inner.delete_all_certs().await
    }
}

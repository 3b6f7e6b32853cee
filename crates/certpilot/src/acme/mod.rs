//! Certificate lifecycle management
//!
//! Issues certificates through an ACME CA and keeps them renewed.
//!
//! # Architecture
//!
//! - [`Certificate`] - The stored aggregate: domains, key material, expiry, secret
//! - [`CertificateStore`] - Persistence contract, with memory and file implementations
//! - [`CaClient`] / [`ChallengeProviderSource`] - The CA and domain-ownership collaborators
//! - [`Orchestrator`] - Runs first issuance and renewal exchanges and records the outcome
//! - [`Dispatcher`] / [`WorkerPool`] - Bounded issue and renew queues with a fixed worker pool
//! - [`RenewalScanner`] - Periodic sweep feeding due certificates to the renew queue
//! - [`CertificateService`] - Create, list, delete, download and renew on request
//!
//! # Issuance Flow
//!
//! 1. [`CertificateService::create`] validates the request and registers the CA account
//! 2. The unissued certificate is stored and queued for issuance, waiting for queue space
//! 3. A worker picks it up and calls [`Orchestrator::trigger`]
//! 4. The orchestrator builds a challenge handler and orders the certificate
//! 5. The bundle (or the error) is written back to the stored record
//!
//! # Renewal Flow
//!
//! 1. Every period, [`RenewalScanner`] loads all issued certificates
//! 2. Those with fewer than `renew_at` whole days left are offered to the renew queue
//! 3. A full queue rejects the offer; the next sweep tries again
//! 4. A worker calls [`Orchestrator::renew`], which reuses the stored private key

mod challenge;
mod client;
mod dispatcher;
mod error;
mod keys;
mod locks;
mod model;
mod orchestrator;
mod scheduler;
mod service;
mod storage;

pub use challenge::{
    compute_dns01_digest, dns01_record_name, ChallengeCredentials, ChallengeHandler,
    ChallengeProviderSource, CredentialChallengeSource, PendingChallenges,
};
pub use client::{CaClient, CertificateBundle, ClientRegistrar, ObtainRequest, Registrar};
pub use dispatcher::{Dispatcher, WorkQueues, WorkerPool};
pub use error::{
    CaError, CertificateError, ChallengeError, DispatchError, KeyMaterialError, ServiceError,
    StorageError,
};
pub use keys::{certificate_not_after, generate_account_key, new_secret, parse_private_key};
pub use locks::{InFlight, InFlightGuard, RecordGuard, RecordLocks, StoreGuard};
pub use model::{
    AccountIdentity, Certificate, IssuedMaterial, Registration, DEFAULT_RENEW_AT_DAYS,
};
pub use orchestrator::{Orchestrator, DEFAULT_EXCHANGE_TIMEOUT};
pub use scheduler::{PeriodicTask, RenewalScanner, ScanReport, Ticker};
pub use service::{Artifact, CertificateService, Download};
pub use storage::{CertificateStore, FileCertificateStore, MemoryCertificateStore};

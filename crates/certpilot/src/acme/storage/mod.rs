//! Certificate storage
//!
//! [`CertificateStore`] is the only persistence contract the engine relies
//! on. Two implementations ship with the crate: [`MemoryCertificateStore`]
//! for tests and embedding, and [`FileCertificateStore`] which keeps one
//! JSON document per certificate on disk.

mod file;
mod memory;

pub use file::FileCertificateStore;
pub use memory::MemoryCertificateStore;

use async_trait::async_trait;
use certpilot_common::CertificateId;

use super::error::StorageError;
use super::model::Certificate;

/// Persistence for certificate records
///
/// Implementations must be safe to call from many tasks at once. A missing
/// record is `Ok(None)` from [`cert`](Self::cert), never an error.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Every stored certificate, in no particular order
    async fn all_certs(&self) -> Result<Vec<Certificate>, StorageError>;

    /// Look up one certificate
    async fn cert(&self, id: &CertificateId) -> Result<Option<Certificate>, StorageError>;

    /// Insert or replace a certificate
    async fn save_cert(&self, cert: &Certificate) -> Result<(), StorageError>;

    /// Remove a certificate; removing a missing id is not an error
    async fn delete_cert(&self, id: &CertificateId) -> Result<(), StorageError>;

    /// Remove every certificate
    async fn delete_all_certs(&self) -> Result<(), StorageError>;
}

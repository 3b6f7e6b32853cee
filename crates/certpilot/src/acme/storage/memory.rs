//! In-memory certificate store

use async_trait::async_trait;
use certpilot_common::CertificateId;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::CertificateStore;
use crate::acme::error::StorageError;
use crate::acme::model::Certificate;

/// Certificate store backed by a `DashMap`
///
/// Records are cloned in and out, so callers never share a live record.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    certs: DashMap<CertificateId, Certificate>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn all_certs(&self) -> Result<Vec<Certificate>, StorageError> {
        Ok(self.certs.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn cert(&self, id: &CertificateId) -> Result<Option<Certificate>, StorageError> {
        let cert = self.certs.get(id).map(|entry| entry.value().clone());
        trace!(cert_id = %id, found = cert.is_some(), "Memory store lookup");
        Ok(cert)
    }

    async fn save_cert(&self, cert: &Certificate) -> Result<(), StorageError> {
        self.certs.insert(cert.id.clone(), cert.clone());
        debug!(cert_id = %cert.id, "Saved certificate");
        Ok(())
    }

    async fn delete_cert(&self, id: &CertificateId) -> Result<(), StorageError> {
        if self.certs.remove(id).is_some() {
            debug!(cert_id = %id, "Deleted certificate");
        }
        Ok(())
    }

    async fn delete_all_certs(&self) -> Result<(), StorageError> {
        let count = self.certs.len();
        self.certs.clear();
        debug!(deleted = count, "Deleted all certificates");
        Ok(())
    }
}

//! Per-certificate coordination
//!
//! Two primitives keep concurrent work on one certificate consistent:
//!
//! - [`InFlight`] admits at most one CA exchange per id at a time.
//! - [`RecordLocks`] serializes read-modify-write cycles on a stored record,
//!   so an exchange commit and a secret rotation never overwrite each other.
//!   Bulk operations take [`RecordLocks::lock_all`], which waits out every
//!   per-record holder and keeps new ones out until it is dropped.
//!
//! Both clean up after themselves; idle ids hold no memory.

use std::sync::Arc;

use certpilot_common::CertificateId;
use dashmap::{DashMap, DashSet};
use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::trace;

/// Per-id async mutexes, created on demand
#[derive(Debug, Clone, Default)]
pub struct RecordLocks {
    locks: Arc<DashMap<CertificateId, Arc<Mutex<()>>>>,
    /// Shared by per-record holders, exclusive for whole-store operations
    store: Arc<RwLock<()>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one record
    pub async fn lock(&self, id: &CertificateId) -> RecordGuard {
        let shared = Arc::clone(&self.store).read_owned().await;
        let mutex = self.locks.entry(id.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        trace!(cert_id = %id, "Acquired record lock");

        RecordGuard {
            locks: self.clone(),
            id: id.clone(),
            guard: Some(guard),
            _shared: shared,
        }
    }

    /// Wait for exclusive access to every record
    pub async fn lock_all(&self) -> StoreGuard {
        let guard = Arc::clone(&self.store).write_owned().await;
        trace!("Acquired store lock");
        StoreGuard { _guard: guard }
    }

    /// Number of ids with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one record until dropped
#[derive(Debug)]
pub struct RecordGuard {
    locks: RecordLocks,
    id: CertificateId,
    guard: Option<OwnedMutexGuard<()>>,
    _shared: OwnedRwLockReadGuard<()>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        // Release first so the count below only sees the map and waiters
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Exclusive access to the whole store until dropped
#[derive(Debug)]
pub struct StoreGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

/// Ids with a CA exchange currently running
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<DashSet<CertificateId>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id, or `None` if an exchange for it is already running
    pub fn try_begin(&self, id: &CertificateId) -> Option<InFlightGuard> {
        if self.ids.insert(id.clone()) {
            Some(InFlightGuard {
                ids: Arc::clone(&self.ids),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &CertificateId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Releases an in-flight claim when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<DashSet<CertificateId>>,
    id: CertificateId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

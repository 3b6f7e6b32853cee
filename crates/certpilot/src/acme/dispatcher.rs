//! Request admission and the worker pool
//!
//! Two bounded FIFO queues feed a fixed pool of workers:
//!
//! - **issue**: first issuance of newly created certificates
//! - **renew**: renewals requested by the scanner or by operators
//!
//! Admission through [`Dispatcher::request_issue`] and
//! [`Dispatcher::request_renew`] never waits; a full queue answers `false`
//! and the caller decides what to tell its own caller. The creation path
//! uses [`Dispatcher::enqueue_issue`] instead, which waits for space, so a
//! newly created certificate is always scheduled.
//!
//! Every worker waits on both queues and takes whichever yields first.

use std::sync::Arc;

use certpilot_common::CertificateId;
use certpilot_config::{DispatcherConfig, MAX_POOL_SIZE, MIN_POOL_SIZE};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::error::DispatchError;
use super::orchestrator::Orchestrator;
use crate::metrics::{EngineMetrics, QUEUE_ISSUE, QUEUE_RENEW};

/// Admission handle for both queues
///
/// Cheap to clone; every clone feeds the same queues.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    issue_tx: mpsc::Sender<CertificateId>,
    renew_tx: mpsc::Sender<CertificateId>,
    metrics: Option<EngineMetrics>,
}

/// Receiving ends of the queues, consumed by [`WorkerPool::spawn`]
#[derive(Debug)]
pub struct WorkQueues {
    issue_rx: mpsc::Receiver<CertificateId>,
    renew_rx: mpsc::Receiver<CertificateId>,
}

#[cfg(test)]
impl WorkQueues {
    pub(crate) fn issue_rx_mut(&mut self) -> &mut mpsc::Receiver<CertificateId> {
        &mut self.issue_rx
    }

    pub(crate) fn renew_rx_mut(&mut self) -> &mut mpsc::Receiver<CertificateId> {
        &mut self.renew_rx
    }
}

impl Dispatcher {
    /// Create both queues with the configured capacities
    pub fn new(config: &DispatcherConfig) -> (Self, WorkQueues) {
        let (issue_tx, issue_rx) = mpsc::channel(pool_size(config.issue_queue_capacity));
        let (renew_tx, renew_rx) = mpsc::channel(pool_size(config.renew_queue_capacity));

        debug!(
            issue_queue_capacity = issue_tx.max_capacity(),
            renew_queue_capacity = renew_tx.max_capacity(),
            "Created dispatcher queues"
        );

        (
            Self {
                issue_tx,
                renew_tx,
                metrics: None,
            },
            WorkQueues { issue_rx, renew_rx },
        )
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue a first issuance; `false` if the issue queue is full
    pub fn request_issue(&self, id: CertificateId) -> bool {
        self.admit(&self.issue_tx, QUEUE_ISSUE, id)
    }

    /// Queue a renewal; `false` if the renew queue is full
    pub fn request_renew(&self, id: CertificateId) -> bool {
        self.admit(&self.renew_tx, QUEUE_RENEW, id)
    }

    /// Queue a first issuance, waiting for space
    pub async fn enqueue_issue(&self, id: CertificateId) -> Result<(), DispatchError> {
        trace!(cert_id = %id, "Waiting for issue queue space");
        self.issue_tx
            .send(id)
            .await
            .map_err(|_| DispatchError::Closed)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_admission(QUEUE_ISSUE, true);
        }
        Ok(())
    }

    pub fn issue_capacity(&self) -> usize {
        self.issue_tx.max_capacity()
    }

    pub fn renew_capacity(&self) -> usize {
        self.renew_tx.max_capacity()
    }

    fn admit(&self, tx: &mpsc::Sender<CertificateId>, queue: &'static str, id: CertificateId) -> bool {
        let accepted = match tx.try_send(id) {
            Ok(()) => true,
            Err(TrySendError::Full(id)) => {
                debug!(cert_id = %id, queue, "Queue full, rejecting request");
                false
            }
            Err(TrySendError::Closed(id)) => {
                warn!(cert_id = %id, queue, "Queue closed, rejecting request");
                false
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_admission(queue, accepted);
        }
        accepted
    }
}

fn pool_size(value: usize) -> usize {
    value.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
}

enum Job {
    Issue(CertificateId),
    Renew(CertificateId),
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<CertificateId>>>;

/// Fixed set of workers draining both queues
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Start `workers` workers (clamped to 1-100)
    pub fn spawn(queues: WorkQueues, orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        let workers = pool_size(workers);
        let shutdown = CancellationToken::new();
        let issue_rx: SharedReceiver = Arc::new(Mutex::new(queues.issue_rx));
        let renew_rx: SharedReceiver = Arc::new(Mutex::new(queues.renew_rx));

        let handles = (0..workers)
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    Arc::clone(&issue_rx),
                    Arc::clone(&renew_rx),
                    Arc::clone(&orchestrator),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers, "Started certificate workers");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token that stops every worker once its current job is done
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the workers and wait for running exchanges to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Certificate worker panicked");
            }
        }
        info!("Certificate workers stopped");
    }
}

async fn next(rx: &SharedReceiver) -> Option<CertificateId> {
    rx.lock().await.recv().await
}

async fn run_worker(
    index: usize,
    issue_rx: SharedReceiver,
    renew_rx: SharedReceiver,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) {
    trace!(worker = index, "Certificate worker started");

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = next(&issue_rx) => match id {
                Some(id) => Job::Issue(id),
                None => break,
            },
            id = next(&renew_rx) => match id {
                Some(id) => Job::Renew(id),
                None => break,
            },
        };

        match job {
            Job::Issue(id) => {
                debug!(worker = index, cert_id = %id, "Processing issue request");
                orchestrator.trigger(&id).await;
            }
            Job::Renew(id) => {
                debug!(worker = index, cert_id = %id, "Processing renew request");
                match orchestrator.store().cert(&id).await {
                    Ok(Some(cert)) => orchestrator.renew(&cert).await,
                    Ok(None) => {
                        warn!(cert_id = %id, "Certificate to renew not found, dropping request");
                    }
                    Err(e) => {
                        error!(cert_id = %id, error = %e, "Failed to load certificate for renewal");
                    }
                }
            }
        }
    }

    trace!(worker = index, "Certificate worker stopped");
}

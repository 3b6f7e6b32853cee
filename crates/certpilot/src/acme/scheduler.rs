//! Periodic renewal sweep
//!
//! A [`Ticker`] drives any [`PeriodicTask`] on a fixed period until it is
//! cancelled. The [`RenewalScanner`] is the task that matters here: each
//! sweep loads every stored certificate and asks the dispatcher to renew the
//! ones inside their renewal window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::dispatcher::Dispatcher;
use super::error::StorageError;
use super::storage::CertificateStore;
use crate::metrics::EngineMetrics;

/// Shortest period a ticker will run at
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Work run on every tick
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run one iteration; failures are the task's to report
    async fn run_once(&self);
}

/// Background loop calling a [`PeriodicTask`] every period
pub struct Ticker {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Ticker {
    /// Start the loop
    ///
    /// With `run_immediately` the first iteration runs right away,
    /// otherwise after one full period. A zero period is raised to the
    /// minimum.
    pub fn spawn(
        task: Arc<dyn PeriodicTask>,
        period: Duration,
        run_immediately: bool,
        shutdown: CancellationToken,
    ) -> Self {
        if period < MIN_PERIOD {
            warn!(task = task.name(), ?period, "Ticker period too short, clamping");
        }
        let period = period.max(MIN_PERIOD);
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            info!(
                task = task.name(),
                period_secs = period.as_secs(),
                run_immediately,
                "Starting periodic task"
            );

            let mut ticks = interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                trace!(task = task.name(), "Periodic task tick");
                task.run_once().await;
            }

            debug!(task = task.name(), "Periodic task stopped");
        });

        Self { handle, shutdown }
    }

    /// Cancel the loop and wait for a running iteration to finish
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Periodic task panicked");
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Certificates loaded from the store
    pub scanned: usize,
    /// Certificates inside their renewal window
    pub due: usize,
    /// Due certificates admitted to the renew queue
    pub enqueued: usize,
    /// Due certificates refused because the queue was full
    pub rejected: usize,
}

/// Feeds due certificates to the renew queue
pub struct RenewalScanner {
    store: Arc<dyn CertificateStore>,
    dispatcher: Dispatcher,
    metrics: Option<EngineMetrics>,
}

impl RenewalScanner {
    pub fn new(store: Arc<dyn CertificateStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one sweep as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ScanReport, StorageError> {
        let certs = self.store.all_certs().await?;
        let mut report = ScanReport {
            scanned: certs.len(),
            ..Default::default()
        };

        for cert in &certs {
            if !cert.needs_renewal(now) {
                trace!(
                    cert_id = %cert.id,
                    days_left = ?cert.days_left(now),
                    renew_at = cert.renew_at,
                    "Certificate not due for renewal"
                );
                continue;
            }
            let days_left = cert.days_left(now).unwrap_or_default();

            report.due += 1;
            if self.dispatcher.request_renew(cert.id.clone()) {
                report.enqueued += 1;
                info!(
                    cert_id = %cert.id,
                    common_name = %cert.common_name,
                    days_left,
                    renew_at = cert.renew_at,
                    "Certificate queued for renewal"
                );
            } else {
                report.rejected += 1;
                warn!(
                    cert_id = %cert.id,
                    common_name = %cert.common_name,
                    days_left,
                    "Renew queue full, retrying on next sweep"
                );
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(report.enqueued);
        }

        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for RenewalScanner {
    fn name(&self) -> &'static str {
        "renewal-scanner"
    }

    async fn run_once(&self) {
        debug!("Running scheduled renewal sweep");

        match self.sweep(Utc::now()).await {
            Ok(report) => info!(
                scanned = report.scanned,
                due = report.due,
                enqueued = report.enqueued,
                rejected = report.rejected,
                "Renewal sweep complete"
            ),
            Err(e) => error!(error = %e, "Renewal sweep failed, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::dispatcher::WorkQueues;
    use crate::acme::model::Certificate;
    use crate::acme::storage::MemoryCertificateStore;
    use certpilot_common::CertificateId;
    use certpilot_config::DispatcherConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(renew_capacity: usize) -> (Dispatcher, WorkQueues) {
        Dispatcher::new(&DispatcherConfig {
            issue_queue_capacity: 10,
            renew_queue_capacity: renew_capacity,
            workers: 1,
        })
    }

    async fn issued(
        store: &MemoryCertificateStore,
        expiry: DateTime<Utc>,
        renew_at: u32,
    ) -> Certificate {
        let mut cert = Certificate::new(vec!["example.com".to_string()], "ops@example.com").unwrap();
        cert.issued = true;
        cert.expiry = Some(expiry);
        cert.renew_at = renew_at;
        store.save_cert(&cert).await.unwrap();
        cert
    }

    #[tokio::test]
    async fn test_sweep_enqueues_due_certificates() {
        let store = Arc::new(MemoryCertificateStore::new());
        let now = Utc::now();
        let soon = issued(&store, now + chrono::Duration::days(5), 30).await;
        let _later = issued(&store, now + chrono::Duration::days(60), 30).await;

        let (dispatcher, mut queues) = dispatcher(10);
        let scanner = RenewalScanner::new(store, dispatcher);

        let report = scanner.sweep(now).await.unwrap();
        assert_eq!(
            report,
            ScanReport {
                scanned: 2,
                due: 1,
                enqueued: 1,
                rejected: 0
            }
        );
        assert_eq!(queues.renew_rx_mut().try_recv().unwrap(), soon.id);
        assert!(queues.renew_rx_mut().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_skips_unissued() {
        let store = Arc::new(MemoryCertificateStore::new());
        let mut cert = Certificate::new(vec!["example.com".to_string()], "ops@example.com").unwrap();
        cert.expiry = Some(Utc::now() - chrono::Duration::days(1));
        store.save_cert(&cert).await.unwrap();

        let (dispatcher, _queues) = dispatcher(10);
        let scanner = RenewalScanner::new(store, dispatcher);

        let report = scanner.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.due, 0);
    }

    #[tokio::test]
    async fn test_sweep_reports_full_queue() {
        let store = Arc::new(MemoryCertificateStore::new());
        let now = Utc::now();
        for _ in 0..3 {
            issued(&store, now + chrono::Duration::days(1), 30).await;
        }

        let (dispatcher, _queues) = dispatcher(2);
        let metrics = EngineMetrics::new().unwrap();
        let scanner = RenewalScanner::new(store, dispatcher).with_metrics(metrics.clone());

        let report = scanner.sweep(now).await.unwrap();
        assert_eq!(report.due, 3);
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(metrics.sweeps(), 1);
    }

    #[tokio::test]
    async fn test_sweep_threshold_boundary() {
        let store = Arc::new(MemoryCertificateStore::new());
        let now = Utc::now();
        // Exactly renew_at days left is not yet due
        issued(&store, now + chrono::Duration::days(30), 30).await;

        let (dispatcher, _queues) = dispatcher(10);
        let scanner = RenewalScanner::new(store, dispatcher);

        assert_eq!(scanner.sweep(now).await.unwrap().due, 0);
    }

    #[tokio::test]
    async fn test_sweep_agrees_with_needs_renewal() {
        let store = Arc::new(MemoryCertificateStore::new());
        let now = Utc::now();
        let mut expected = 0;
        for days in -2..40 {
            let cert = issued(&store, now + chrono::Duration::days(days), 30).await;
            if cert.needs_renewal(now) {
                expected += 1;
            }
        }

        let (dispatcher, _queues) = dispatcher(100);
        let scanner = RenewalScanner::new(store, dispatcher);

        let report = scanner.sweep(now).await.unwrap();
        assert_eq!(report.due, expected);
        assert_eq!(report.enqueued, expected);
    }

    struct BrokenStore;

    #[async_trait]
    impl CertificateStore for BrokenStore {
        async fn all_certs(&self) -> Result<Vec<Certificate>, StorageError> {
            Err(StorageError::Backend("disk on fire".to_string()))
        }
        async fn cert(&self, _id: &CertificateId) -> Result<Option<Certificate>, StorageError> {
            Ok(None)
        }
        async fn save_cert(&self, _cert: &Certificate) -> Result<(), StorageError> {
            Ok(())
        }
        async fn delete_cert(&self, _id: &CertificateId) -> Result<(), StorageError> {
            Ok(())
        }
        async fn delete_all_certs(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_store_failure() {
        let (dispatcher, _queues) = dispatcher(10);
        let scanner = RenewalScanner::new(Arc::new(BrokenStore), dispatcher);

        assert!(scanner.sweep(Utc::now()).await.is_err());
        // The periodic entry point swallows the failure
        scanner.run_once().await;
    }

    struct CountingTask {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ticker_runs_and_stops() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        });
        let ticker = Ticker::spawn(
            task.clone(),
            Duration::from_millis(10),
            true,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        ticker.stop().await;

        let runs = task.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several runs, got {runs}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_ticker_waits_one_period() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let ticker = Ticker::spawn(task.clone(), Duration::from_secs(3600), false, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);

        // Cancelling the shared token stops the ticker too
        shutdown.cancel();
        ticker.stop().await;
    }

    #[tokio::test]
    async fn test_ticker_zero_period_is_clamped() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        });
        let ticker = Ticker::spawn(task.clone(), Duration::ZERO, true, CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(20)).await;
        ticker.stop().await;

        assert!(task.runs.load(Ordering::SeqCst) >= 1);
    }
}

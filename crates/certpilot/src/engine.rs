//! Engine startup and shutdown
//!
//! Builds the dispatcher, worker pool and renewal ticker from configuration
//! and keeps the handles needed to stop them again.

use std::sync::Arc;

use certpilot_config::Config;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use validator::Validate;

use crate::acme::{
    CaClient, CertificateService, CertificateStore, ChallengeProviderSource, Dispatcher,
    Orchestrator, Registrar, RenewalScanner, Ticker, WorkerPool,
};
use crate::metrics::EngineMetrics;

/// Errors raised while starting the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] validator::ValidationErrors),

    #[error("failed to set up metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// A running certificate engine
pub struct Engine {
    dispatcher: Dispatcher,
    orchestrator: Arc<Orchestrator>,
    service: CertificateService,
    scanner: Arc<RenewalScanner>,
    workers: WorkerPool,
    ticker: Ticker,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl Engine {
    /// Start workers and the renewal ticker
    ///
    /// The configuration is validated first; nothing is spawned if it is out
    /// of range. Must be called from within a Tokio runtime.
    pub fn start(
        config: &Config,
        store: Arc<dyn CertificateStore>,
        challenges: Arc<dyn ChallengeProviderSource>,
        client: Arc<dyn CaClient>,
    ) -> Result<Self, EngineError> {
        Self::start_with_registrar(config, store, challenges, client, None)
    }

    /// Like [`start`](Self::start), with account registration replaced
    pub fn start_with_registrar(
        config: &Config,
        store: Arc<dyn CertificateStore>,
        challenges: Arc<dyn ChallengeProviderSource>,
        client: Arc<dyn CaClient>,
        registrar: Option<Arc<dyn Registrar>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = EngineMetrics::new()?;
        let shutdown = CancellationToken::new();

        let mut orchestrator = Orchestrator::new(Arc::clone(&store), challenges, client)
            .with_exchange_timeout(config.exchange.timeout())
            .with_metrics(metrics.clone());
        if let Some(registrar) = registrar {
            orchestrator = orchestrator.with_registrar(registrar);
        }
        let orchestrator = Arc::new(orchestrator);

        let (dispatcher, queues) = Dispatcher::new(&config.dispatcher);
        let dispatcher = dispatcher.with_metrics(metrics.clone());

        let workers = WorkerPool::spawn(
            queues,
            Arc::clone(&orchestrator),
            config.dispatcher.workers,
        );

        let scanner = Arc::new(
            RenewalScanner::new(Arc::clone(&store), dispatcher.clone())
                .with_metrics(metrics.clone()),
        );
        let ticker = Ticker::spawn(
            scanner.clone(),
            config.scanner.period(),
            config.scanner.scan_on_startup,
            shutdown.child_token(),
        );

        let service = CertificateService::new(Arc::clone(&orchestrator), dispatcher.clone())
            .with_default_renew_at(config.scanner.default_renew_at_days);

        info!(
            workers = workers.len(),
            issue_queue_capacity = dispatcher.issue_capacity(),
            renew_queue_capacity = dispatcher.renew_capacity(),
            scan_period_secs = config.scanner.period_secs,
            "Certificate engine started"
        );

        Ok(Self {
            dispatcher,
            orchestrator,
            service,
            scanner,
            workers,
            ticker,
            metrics,
            shutdown,
        })
    }

    pub fn service(&self) -> &CertificateService {
        &self.service
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The scanner driven by the ticker, for running a sweep by hand
    pub fn scanner(&self) -> &RenewalScanner {
        &self.scanner
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Stop the ticker, then the workers; running exchanges complete first
    pub async fn shutdown(self) {
        info!("Shutting down certificate engine");
        self.shutdown.cancel();
        self.ticker.stop().await;
        self.workers.shutdown().await;
        info!("Certificate engine stopped");
    }
}

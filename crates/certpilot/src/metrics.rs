//! Prometheus counters for the certificate engine
//!
//! The registry is owned here rather than using the process-global one, so
//! several engines (and tests) can run side by side.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Admission queue label values
pub const QUEUE_ISSUE: &str = "issue";
pub const QUEUE_RENEW: &str = "renew";

/// Exchange kind label values
pub const KIND_TRIGGER: &str = "trigger";
pub const KIND_RENEW: &str = "renew";

/// Exchange outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_SKIPPED: &str = "skipped";

/// Engine counters
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    admissions: IntCounterVec,
    exchanges: IntCounterVec,
    sweeps: IntCounter,
    sweep_enqueued: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let admissions = IntCounterVec::new(
            Opts::new(
                "certpilot_admissions_total",
                "Queue admission attempts by queue and outcome",
            ),
            &["queue", "outcome"],
        )?;
        let exchanges = IntCounterVec::new(
            Opts::new(
                "certpilot_exchanges_total",
                "CA exchanges by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let sweeps = IntCounter::new("certpilot_sweeps_total", "Completed renewal sweeps")?;
        let sweep_enqueued = IntCounter::new(
            "certpilot_sweep_enqueued_total",
            "Certificates enqueued for renewal by sweeps",
        )?;

        registry.register(Box::new(admissions.clone()))?;
        registry.register(Box::new(exchanges.clone()))?;
        registry.register(Box::new(sweeps.clone()))?;
        registry.register(Box::new(sweep_enqueued.clone()))?;

        Ok(Self {
            registry,
            admissions,
            exchanges,
            sweeps,
            sweep_enqueued,
        })
    }

    pub fn record_admission(&self, queue: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.admissions.with_label_values(&[queue, outcome]).inc();
    }

    pub fn record_exchange(&self, kind: &str, outcome: &str) {
        self.exchanges.with_label_values(&[kind, outcome]).inc();
    }

    pub fn record_sweep(&self, enqueued: usize) {
        self.sweeps.inc();
        self.sweep_enqueued.inc_by(enqueued as u64);
    }

    pub fn admissions(&self, queue: &str, outcome: &str) -> u64 {
        self.admissions.with_label_values(&[queue, outcome]).get()
    }

    pub fn exchanges(&self, kind: &str, outcome: &str) -> u64 {
        self.exchanges.with_label_values(&[kind, outcome]).get()
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.get()
    }

    /// Text exposition of every counter
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("sweeps", &self.sweeps.get())
            .finish_non_exhaustive()
    }
}

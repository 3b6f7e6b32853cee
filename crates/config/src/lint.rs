//! Configuration linting
//!
//! Flags settings that are valid but probably not what the operator wants.

use std::fmt;

use crate::Config;

/// Typical lifetime of a certificate from a public ACME CA
const TYPICAL_LIFETIME_DAYS: u32 = 90;

/// A non-fatal configuration finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintWarning {
    pub message: String,
}

impl LintWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Lint configuration for likely mistakes
pub fn lint_config(config: &Config) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    let renew_at = config.scanner.default_renew_at_days;
    if renew_at == 0 {
        warnings.push(LintWarning::new(
            "scanner.default-renew-at-days is 0; certificates will only renew after they expire",
        ));
    } else if renew_at >= TYPICAL_LIFETIME_DAYS {
        warnings.push(LintWarning::new(format!(
            "scanner.default-renew-at-days is {} which is at least a typical {}-day lifetime; \
             certificates will be renewed on every sweep",
            renew_at, TYPICAL_LIFETIME_DAYS
        )));
    }

    if config.scanner.period_secs > 24 * 3600 {
        warnings.push(LintWarning::new(format!(
            "scanner.period-secs is {}; sweeps less than daily can miss short renewal windows",
            config.scanner.period_secs
        )));
    }

    let dispatcher = &config.dispatcher;
    if dispatcher.workers > dispatcher.issue_queue_capacity + dispatcher.renew_queue_capacity {
        warnings.push(LintWarning::new(format!(
            "dispatcher.workers ({}) exceeds the combined queue capacity ({}); extra workers will stay idle",
            dispatcher.workers,
            dispatcher.issue_queue_capacity + dispatcher.renew_queue_capacity
        )));
    }

    warnings
}

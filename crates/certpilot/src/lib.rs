//! certpilot certificate engine
//!
//! Keeps TLS certificates issued and renewed through an ACME certificate
//! authority without operator intervention.
//!
//! - **Admission**: bounded issue and renew queues that refuse work when full
//! - **Workers**: a fixed pool draining both queues
//! - **Renewal sweep**: a periodic scan comparing remaining lifetime to each
//!   certificate's threshold
//! - **Failure recording**: a failed exchange is stored on the certificate
//!   and never stops the pipeline
//!
//! The CA protocol, challenge provider and storage backend are supplied by
//! the embedding application through [`acme::CaClient`],
//! [`acme::ChallengeProviderSource`] and [`acme::CertificateStore`].
//!
//! # Example
//!
//! ```ignore
//! use certpilot::{Engine, acme::FileCertificateStore};
//! use certpilot_config::Config;
//!
//! let config = Config::load(None)?;
//! let store = Arc::new(FileCertificateStore::new(&config.storage.path)?);
//! let engine = Engine::start(&config, store, challenges, ca_client)?;
//!
//! let cert = engine
//!     .service()
//!     .create(vec!["example.com".into()], "ops@example.com", None)
//!     .await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod engine;
pub mod metrics;

#[cfg(test)]
mod test_utils;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use engine::{Engine, EngineError};
pub use metrics::EngineMetrics;

pub use certpilot_common::{valid_domain, valid_domains, CertificateId};
pub use certpilot_config::Config;

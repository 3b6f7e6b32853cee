//! Common types shared across the certpilot crates.
//!
//! - [`CertificateId`] - type-safe certificate identifier
//! - [`valid_domains`] - domain set validation used when certificates are created

pub mod domain;
pub mod ids;

pub use domain::{valid_domain, valid_domains};
pub use ids::CertificateId;

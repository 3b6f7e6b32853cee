//! Certificate aggregate
//!
//! A [`Certificate`] is created once by [`Certificate::new`], persisted
//! unissued, and afterwards mutated only by the orchestrator (issuance
//! outcome) and by secret rotation.

use std::fmt;

use certpilot_common::{valid_domains, CertificateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use validator::ValidateEmail;

use super::client::CertificateBundle;
use super::error::{CaError, CertificateError};
use super::keys;

/// Days before expiry at which a new certificate becomes due for renewal
pub const DEFAULT_RENEW_AT_DAYS: u32 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

/// CA account resource returned by registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Account URL at the CA
    pub uri: String,
    /// Raw account object as returned by the CA
    #[serde(default)]
    pub body: serde_json::Value,
}

/// CA account identity bound to a certificate
#[derive(Clone)]
pub struct AccountIdentity {
    pub email: String,
    pub registration: Option<Registration>,
    /// PKCS#8 PEM account key
    pub key_pem: String,
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("email", &self.email)
            .field("registered", &self.registration.is_some())
            .finish()
    }
}

/// A managed certificate and everything needed to issue and renew it
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,

    /// One-time bearer token for private key retrieval
    pub secret: String,

    /// Ordered domain set; the first entry is the common name
    pub domains: Vec<String>,
    pub common_name: String,

    #[serde(default)]
    pub cert_url: String,
    #[serde(default)]
    pub cert_stable_url: String,

    #[serde(default, with = "base64_bytes")]
    pub private_key: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub certificate: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub issuer_certificate: Vec<u8>,

    #[serde(default)]
    pub issued: bool,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,

    /// Days before expiry at which auto-renewal triggers
    pub renew_at: u32,

    /// Outcome of the most recent failed exchange
    #[serde(default)]
    pub last_error: Option<String>,

    pub mod_time: DateTime<Utc>,

    pub acme_email: String,
    #[serde(default)]
    pub acme_registration: Option<Registration>,
    pub acme_account_key: String,
}

impl Certificate {
    /// Build a new, unissued certificate.
    ///
    /// Validates the domain set and contact email, then generates the id,
    /// secret and CA account key. Nothing is persisted and the CA is not
    /// contacted.
    pub fn new(domains: Vec<String>, email: &str) -> Result<Self, CertificateError> {
        if !valid_domains(&domains) {
            return Err(CertificateError::InvalidDomains);
        }
        if !email.validate_email() {
            return Err(CertificateError::InvalidEmail(email.to_string()));
        }

        let acme_account_key = keys::generate_account_key()?;
        let common_name = domains[0].clone();

        Ok(Self {
            id: CertificateId::new(),
            secret: keys::new_secret(),
            domains,
            common_name,
            cert_url: String::new(),
            cert_stable_url: String::new(),
            private_key: Vec::new(),
            certificate: Vec::new(),
            issuer_certificate: Vec::new(),
            issued: false,
            expiry: None,
            renew_at: DEFAULT_RENEW_AT_DAYS,
            last_error: None,
            mod_time: Utc::now(),
            acme_email: email.to_string(),
            acme_registration: None,
            acme_account_key,
        })
    }

    /// Replace the domain set; the first entry becomes the common name
    pub fn set_domains(&mut self, domains: Vec<String>) -> Result<(), CertificateError> {
        if !valid_domains(&domains) {
            return Err(CertificateError::InvalidDomains);
        }
        self.common_name = domains[0].clone();
        self.domains = domains;
        Ok(())
    }

    /// The CA account this certificate is issued under
    pub fn account(&self) -> AccountIdentity {
        AccountIdentity {
            email: self.acme_email.clone(),
            registration: self.acme_registration.clone(),
            key_pem: self.acme_account_key.clone(),
        }
    }

    /// Whole days until expiry, rounded down.
    ///
    /// `None` for certificates that have not been issued.
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.issued {
            return None;
        }
        let expiry = self.expiry?;
        Some((expiry - now).num_seconds().div_euclid(SECONDS_PER_DAY))
    }

    /// Whether the certificate is inside its renewal window
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.days_left(now)
            .is_some_and(|days| days < i64::from(self.renew_at))
    }

    /// Replace all CA-derived fields with a fresh issuance
    pub fn apply_issuance(&mut self, material: IssuedMaterial) {
        self.cert_url = material.cert_url;
        self.cert_stable_url = material.cert_stable_url;
        self.private_key = material.private_key;
        self.certificate = material.certificate;
        self.issuer_certificate = material.issuer_certificate;
        self.expiry = Some(material.expiry);
        self.issued = true;
        self.last_error = None;
    }

    /// Record a failed exchange; issuance fields are left as they were
    pub fn record_failure(&mut self, error: impl fmt::Display) {
        self.last_error = Some(error.to_string());
    }

    /// Check a presented bearer secret in constant time
    pub fn secret_matches(&self, candidate: &str) -> bool {
        !self.secret.is_empty() && bool::from(self.secret.as_bytes().ct_eq(candidate.as_bytes()))
    }

    /// Replace the secret, invalidating the current one
    pub fn rotate_secret(&mut self) {
        self.secret = keys::new_secret();
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("common_name", &self.common_name)
            .field("domains", &self.domains)
            .field("issued", &self.issued)
            .field("expiry", &self.expiry)
            .field("renew_at", &self.renew_at)
            .field("last_error", &self.last_error)
            .field("mod_time", &self.mod_time)
            .finish_non_exhaustive()
    }
}

/// Validated result of a successful exchange
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    pub cert_url: String,
    pub cert_stable_url: String,
    pub private_key: Vec<u8>,
    pub certificate: Vec<u8>,
    pub issuer_certificate: Vec<u8>,
    pub expiry: DateTime<Utc>,
}

impl TryFrom<CertificateBundle> for IssuedMaterial {
    type Error = CaError;

    fn try_from(bundle: CertificateBundle) -> Result<Self, Self::Error> {
        if bundle.private_key.is_empty() {
            return Err(CaError::InvalidBundle("bundle has no private key".to_string()));
        }
        if bundle.certificate.is_empty() {
            return Err(CaError::InvalidBundle("bundle has no certificate".to_string()));
        }

        let expiry = match bundle.not_after {
            Some(not_after) => not_after,
            None => keys::certificate_not_after(&bundle.certificate)
                .map_err(|e| CaError::InvalidBundle(format!("cannot determine expiry: {e}")))?,
        };

        Ok(Self {
            cert_url: bundle.cert_url,
            cert_stable_url: bundle.cert_stable_url,
            private_key: bundle.private_key,
            certificate: bundle.certificate,
            issuer_certificate: bundle.issuer_certificate,
            expiry,
        })
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn issued(expiry: DateTime<Utc>, renew_at: u32) -> Certificate {
        let mut cert = Certificate::new(domains(&["example.com"]), "ops@example.com").unwrap();
        cert.issued = true;
        cert.expiry = Some(expiry);
        cert.renew_at = renew_at;
        cert
    }

    #[test]
    fn test_new_certificate() {
        let cert = Certificate::new(
            domains(&["example.com", "example2.com"]),
            "test@notexample.com",
        )
        .unwrap();

        assert!(!cert.id.as_str().is_empty());
        assert!(!cert.secret.is_empty());
        assert_eq!(cert.domains, domains(&["example.com", "example2.com"]));
        assert_eq!(cert.common_name, "example.com");
        assert!(cert.cert_url.is_empty());
        assert!(cert.cert_stable_url.is_empty());
        assert!(cert.private_key.is_empty());
        assert!(cert.certificate.is_empty());
        assert!(cert.issuer_certificate.is_empty());
        assert!(!cert.issued);
        assert!(cert.expiry.is_none());
        assert_eq!(cert.renew_at, DEFAULT_RENEW_AT_DAYS);
        assert!(cert.last_error.is_none());
        assert_eq!(cert.acme_email, "test@notexample.com");
        assert!(cert.acme_registration.is_none());
        assert!(keys::parse_private_key(cert.acme_account_key.as_bytes()).is_ok());
    }

    #[test]
    fn test_new_certificate_wildcard() {
        let cert = Certificate::new(domains(&["*.example.com"]), "a@b.com").unwrap();
        assert_eq!(cert.common_name, "*.example.com");
    }

    #[test]
    fn test_new_certificate_invalid_domains() {
        assert_eq!(
            Certificate::new(Vec::new(), "a@b.com").unwrap_err(),
            CertificateError::InvalidDomains
        );
        assert_eq!(
            Certificate::new(domains(&["https://*.example.com"]), "a@b.com").unwrap_err(),
            CertificateError::InvalidDomains
        );
    }

    #[test]
    fn test_new_certificate_invalid_email() {
        assert!(matches!(
            Certificate::new(domains(&["x.com"]), "not-an-email"),
            Err(CertificateError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_unique_identity() {
        let a = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        let b = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.secret, b.secret);
        assert_ne!(a.acme_account_key, b.acme_account_key);
    }

    #[test]
    fn test_days_left_rounds_down() {
        let now = Utc::now();
        let cert = issued(now + Duration::days(5) + Duration::hours(23), 30);
        assert_eq!(cert.days_left(now), Some(5));

        let expired = issued(now - Duration::hours(1), 30);
        assert_eq!(expired.days_left(now), Some(-1));
    }

    #[test]
    fn test_needs_renewal() {
        let now = Utc::now();
        assert!(issued(now + Duration::days(5), 30).needs_renewal(now));
        assert!(!issued(now + Duration::days(60), 30).needs_renewal(now));
        assert!(!issued(now + Duration::days(5), 0).needs_renewal(now));
    }

    #[test]
    fn test_unissued_never_needs_renewal() {
        let now = Utc::now();
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        assert_eq!(cert.days_left(now), None);
        assert!(!cert.needs_renewal(now));

        // A stray expiry on an unissued record is still ignored
        cert.expiry = Some(now - Duration::days(10));
        assert!(!cert.needs_renewal(now));
    }

    #[test]
    fn test_apply_issuance_clears_error() {
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        cert.record_failure("rate limited");
        let secret = cert.secret.clone();
        let expiry = Utc::now() + Duration::days(90);

        cert.apply_issuance(IssuedMaterial {
            cert_url: "https://ca/cert/1".to_string(),
            cert_stable_url: "https://ca/cert/1/stable".to_string(),
            private_key: b"key".to_vec(),
            certificate: b"cert".to_vec(),
            issuer_certificate: b"issuer".to_vec(),
            expiry,
        });

        assert!(cert.issued);
        assert_eq!(cert.expiry, Some(expiry));
        assert!(cert.last_error.is_none());
        assert_eq!(cert.secret, secret);
    }

    #[test]
    fn test_record_failure_keeps_material() {
        let now = Utc::now();
        let mut cert = issued(now + Duration::days(10), 30);
        cert.certificate = b"cert".to_vec();

        cert.record_failure("order failed");

        assert!(cert.issued);
        assert_eq!(cert.certificate, b"cert".to_vec());
        assert_eq!(cert.last_error.as_deref(), Some("order failed"));
    }

    #[test]
    fn test_rotate_secret() {
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        let old = cert.secret.clone();
        assert!(cert.secret_matches(&old));

        cert.rotate_secret();

        assert!(!cert.secret_matches(&old));
        assert!(cert.secret_matches(&cert.secret.clone()));
    }

    #[test]
    fn test_secret_mismatch_variants() {
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        let secret = cert.secret.clone();

        assert!(!cert.secret_matches(""));
        assert!(!cert.secret_matches(&secret[..secret.len() - 1]));
        assert!(!cert.secret_matches(&format!("{secret}x")));

        cert.secret.clear();
        assert!(!cert.secret_matches(""));
    }

    #[test]
    fn test_set_domains() {
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();

        cert.set_domains(domains(&["y.com", "www.y.com"])).unwrap();
        assert_eq!(cert.common_name, "y.com");
        assert_eq!(cert.domains, domains(&["y.com", "www.y.com"]));

        assert_eq!(
            cert.set_domains(domains(&["https://z.com"])),
            Err(CertificateError::InvalidDomains)
        );
        assert_eq!(cert.set_domains(Vec::new()), Err(CertificateError::InvalidDomains));
        assert_eq!(cert.common_name, "y.com");
    }

    #[test]
    fn test_bundle_without_not_after_or_certificate_is_rejected() {
        let bundle = CertificateBundle {
            private_key: b"key".to_vec(),
            certificate: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            IssuedMaterial::try_from(bundle),
            Err(CaError::InvalidBundle(_))
        ));

        let bundle = CertificateBundle {
            private_key: b"key".to_vec(),
            certificate: b"not pem".to_vec(),
            ..Default::default()
        };
        assert!(matches!(
            IssuedMaterial::try_from(bundle),
            Err(CaError::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_keeps_blobs() {
        let mut cert = Certificate::new(domains(&["x.com"]), "a@b.com").unwrap();
        cert.private_key = vec![0, 1, 2, 255];

        let json = serde_json::to_string(&cert).unwrap();
        let decoded: Certificate = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, cert);
    }
}

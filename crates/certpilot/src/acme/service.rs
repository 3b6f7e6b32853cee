//! Certificate management operations
//!
//! [`CertificateService`] is what an API layer calls. It validates input,
//! registers the CA account up front, persists new certificates and hands
//! them to the dispatcher, and gates downloads and explicit renewals behind
//! the per-certificate secret.

use std::sync::Arc;

use certpilot_common::CertificateId;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::error::ServiceError;
use super::model::{Certificate, DEFAULT_RENEW_AT_DAYS};
use super::orchestrator::Orchestrator;
use super::storage::CertificateStore;

/// Downloadable certificate artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    PrivateKey,
    Certificate,
    IssuerCertificate,
}

impl Artifact {
    /// File extension appended to the common name
    pub fn extension(self) -> &'static str {
        match self {
            Artifact::PrivateKey => ".key",
            Artifact::Certificate => ".crt",
            Artifact::IssuerCertificate => ".issuer.crt",
        }
    }

    fn bytes(self, cert: &Certificate) -> Vec<u8> {
        match self {
            Artifact::PrivateKey => cert.private_key.clone(),
            Artifact::Certificate => cert.certificate.clone(),
            Artifact::IssuerCertificate => cert.issuer_certificate.clone(),
        }
    }
}

/// A file handed back to the caller
#[derive(Clone)]
pub struct Download {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mod_time: DateTime<Utc>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .field("mod_time", &self.mod_time)
            .finish()
    }
}

/// Certificate management entry point
pub struct CertificateService {
    store: Arc<dyn CertificateStore>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Dispatcher,
    default_renew_at: u32,
}

impl CertificateService {
    pub fn new(orchestrator: Arc<Orchestrator>, dispatcher: Dispatcher) -> Self {
        Self {
            store: Arc::clone(orchestrator.store()),
            orchestrator,
            dispatcher,
            default_renew_at: DEFAULT_RENEW_AT_DAYS,
        }
    }

    /// Renewal threshold for certificates created without one
    pub fn with_default_renew_at(mut self, days: u32) -> Self {
        self.default_renew_at = days;
        self
    }

    /// Create, register and persist a certificate, then schedule issuance
    ///
    /// Scheduling waits for issue queue space in the background, so this
    /// never fails because the queue is full.
    pub async fn create(
        &self,
        domains: Vec<String>,
        email: &str,
        renew_at: Option<u32>,
    ) -> Result<Certificate, ServiceError> {
        let mut cert = Certificate::new(domains, email)?;

        let registration = self.orchestrator.register(&cert.account()).await?;
        cert.acme_registration = Some(registration);
        cert.renew_at = renew_at.unwrap_or(self.default_renew_at);
        cert.mod_time = Utc::now();

        self.store.save_cert(&cert).await?;

        info!(
            cert_id = %cert.id,
            common_name = %cert.common_name,
            domains = ?cert.domains,
            renew_at = cert.renew_at,
            "Created certificate"
        );

        let dispatcher = self.dispatcher.clone();
        let id = cert.id.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.enqueue_issue(id.clone()).await {
                error!(cert_id = %id, error = %e, "Failed to schedule certificate issuance");
            }
        });

        Ok(cert)
    }

    pub async fn all(&self) -> Result<Vec<Certificate>, ServiceError> {
        Ok(self.store.all_certs().await?)
    }

    pub async fn get(&self, id: &CertificateId) -> Result<Certificate, ServiceError> {
        self.store
            .cert(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    pub async fn delete(&self, id: &CertificateId) -> Result<(), ServiceError> {
        let _guard = self.orchestrator.locks().lock(id).await;
        self.get(id).await?;
        self.store.delete_cert(id).await?;
        info!(cert_id = %id, "Deleted certificate");
        Ok(())
    }

    /// Remove every certificate
    ///
    /// Waits for all record writers, so no exchange commit can land after
    /// the records are gone.
    pub async fn delete_all(&self) -> Result<(), ServiceError> {
        let _guard = self.orchestrator.locks().lock_all().await;
        self.store.delete_all_certs().await?;
        info!("Deleted all certificates");
        Ok(())
    }

    /// Replace the domain set and renewal threshold, then reissue
    ///
    /// The change is saved before the certificate is queued. An issued
    /// certificate goes to the renew queue, one still awaiting issuance to
    /// the issue queue; either way a full queue is `RateLimited` and the
    /// saved change stands.
    pub async fn update(
        &self,
        id: &CertificateId,
        domains: Vec<String>,
        renew_at: u32,
    ) -> Result<Certificate, ServiceError> {
        let cert = {
            let _guard = self.orchestrator.locks().lock(id).await;
            let mut cert = self.get(id).await?;
            cert.set_domains(domains)?;
            cert.renew_at = renew_at;
            cert.mod_time = Utc::now();
            self.store.save_cert(&cert).await?;
            cert
        };

        info!(
            cert_id = %id,
            common_name = %cert.common_name,
            domains = ?cert.domains,
            renew_at = cert.renew_at,
            "Updated certificate"
        );

        let admitted = if cert.issued {
            self.dispatcher.request_renew(cert.id.clone())
        } else {
            self.dispatcher.request_issue(cert.id.clone())
        };
        if !admitted {
            warn!(cert_id = %id, "Queue full, updated certificate not scheduled");
            return Err(ServiceError::RateLimited);
        }
        Ok(cert)
    }

    /// Ask for an out-of-schedule renewal
    pub async fn request_renew(
        &self,
        id: &CertificateId,
        secret: &str,
    ) -> Result<(), ServiceError> {
        let cert = self.issued_with_secret(id, secret).await?;

        if !self.dispatcher.request_renew(cert.id.clone()) {
            return Err(ServiceError::RateLimited);
        }
        debug!(cert_id = %id, "Renewal requested");
        Ok(())
    }

    /// Private key download; the secret is replaced before the key is returned
    pub async fn private_key(
        &self,
        id: &CertificateId,
        secret: &str,
    ) -> Result<Download, ServiceError> {
        let _guard = self.orchestrator.locks().lock(id).await;
        let mut cert = self.issued_with_secret(id, secret).await?;

        cert.rotate_secret();
        cert.mod_time = Utc::now();
        self.store.save_cert(&cert).await?;
        info!(cert_id = %id, "Private key retrieved, secret rotated");

        Ok(download(&cert, Artifact::PrivateKey))
    }

    pub async fn certificate(
        &self,
        id: &CertificateId,
        secret: &str,
    ) -> Result<Download, ServiceError> {
        let cert = self.issued_with_secret(id, secret).await?;
        Ok(download(&cert, Artifact::Certificate))
    }

    pub async fn issuer_certificate(
        &self,
        id: &CertificateId,
        secret: &str,
    ) -> Result<Download, ServiceError> {
        let cert = self.issued_with_secret(id, secret).await?;
        Ok(download(&cert, Artifact::IssuerCertificate))
    }

    async fn issued_with_secret(
        &self,
        id: &CertificateId,
        secret: &str,
    ) -> Result<Certificate, ServiceError> {
        let cert = self.get(id).await?;
        if !cert.issued {
            return Err(ServiceError::NotIssued(id.clone()));
        }
        if !cert.secret_matches(secret) {
            warn!(cert_id = %id, "Rejected request with wrong secret");
            return Err(ServiceError::Unauthorized);
        }
        Ok(cert)
    }
}

fn download(cert: &Certificate, artifact: Artifact) -> Download {
    Download {
        filename: format!("{}{}", cert.common_name, artifact.extension()),
        bytes: artifact.bytes(cert),
        mod_time: cert.mod_time,
    }
}

//! Filesystem certificate store
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── certs/
//!     ├── 0f4c...e1.json    # One document per certificate, keyed by id
//!     └── 7a91...03.json
//! ```
//!
//! Records hold private keys, so the directories are created 0700 and each
//! document 0600 on Unix. Writes go to a temporary file that is synced to
//! disk before it is renamed into place, so readers never observe a
//! half-written record and a completed save survives a crash.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use certpilot_common::CertificateId;
use tracing::{debug, info, trace, warn};

use super::CertificateStore;
use crate::acme::error::StorageError;
use crate::acme::model::Certificate;

const CERTS_DIR: &str = "certs";
const RECORD_EXTENSION: &str = "json";

/// Certificate store keeping one JSON document per certificate
#[derive(Debug)]
pub struct FileCertificateStore {
    /// Base storage directory
    base_path: PathBuf,
    /// `<base>/certs`
    certs_path: PathBuf,
}

impl FileCertificateStore {
    /// Open (or create) a store rooted at `base_path`
    ///
    /// Creates the directory structure if it doesn't exist and sets
    /// restrictive permissions (0700 on Unix).
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let certs_path = base_path.join(CERTS_DIR);
        fs::create_dir_all(&certs_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&certs_path, perms)?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
            certs_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of a record, or `None` if the id cannot name a file safely
    fn record_path(&self, id: &CertificateId) -> Option<PathBuf> {
        let id = id.as_str();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            warn!(cert_id = %id, "Refusing certificate id that is not a plain file name");
            return None;
        }
        Some(self.certs_path.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    async fn read_record(path: &Path) -> Result<Option<Certificate>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Paths of every record document
    async fn record_paths(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.certs_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn all_certs(&self) -> Result<Vec<Certificate>, StorageError> {
        let mut certs = Vec::new();
        for path in self.record_paths().await? {
            match Self::read_record(&path).await {
                Ok(Some(cert)) => certs.push(cert),
                // Deleted between listing and reading
                Ok(None) => {}
                Err(StorageError::Serialization(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable certificate record");
                }
                Err(e) => return Err(e),
            }
        }
        trace!(count = certs.len(), "Loaded all certificates");
        Ok(certs)
    }

    async fn cert(&self, id: &CertificateId) -> Result<Option<Certificate>, StorageError> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };
        let cert = Self::read_record(&path).await?;
        if cert.is_none() {
            trace!(cert_id = %id, "No stored certificate found");
        }
        Ok(cert)
    }

    async fn save_cert(&self, cert: &Certificate) -> Result<(), StorageError> {
        let path = self
            .record_path(&cert.id)
            .ok_or_else(|| StorageError::Backend(format!("invalid certificate id '{}'", cert.id)))?;
        let tmp_path = path.with_extension("tmp");

        let content = serde_json::to_vec_pretty(cert)?;
        tokio::task::spawn_blocking(move || write_durably(&tmp_path, &path, &content))
            .await
            .map_err(|e| StorageError::Backend(format!("write task failed: {e}")))??;

        debug!(
            cert_id = %cert.id,
            common_name = %cert.common_name,
            issued = cert.issued,
            "Saved certificate to storage"
        );
        Ok(())
    }

    async fn delete_cert(&self, id: &CertificateId) -> Result<(), StorageError> {
        let Some(path) = self.record_path(id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(cert_id = %id, "Deleted stored certificate");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(cert_id = %id, "Certificate to delete not found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all_certs(&self) -> Result<(), StorageError> {
        let paths = self.record_paths().await?;
        let count = paths.len();
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(deleted = count, "Deleted all stored certificates");
        Ok(())
    }
}

/// Write `content` to `tmp_path`, flush it to disk, then rename it over `path`
///
/// The parent directory is synced as well so the rename itself survives a
/// crash.
fn write_durably(tmp_path: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(tmp_path)?;
    #[cfg(unix)]
    {
        // A leftover temp file keeps its old mode
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp_path, path)?;

    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        fs::File::open(parent)?.sync_all()?;
    }
    Ok(())
}

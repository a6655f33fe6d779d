//! Local filesystem implementation of the BackupStore trait
//!
//! Artifacts are flat files in a single directory; the directory listing is
//! the catalog, there is no index file.

use std::io::ErrorKind;
use std::path::PathBuf;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::database::backup_naming::{is_artifact_name, validate_filename};
use crate::database::{DatabaseError, Result};

use super::{BackupArtifact, BackupInfo, BackupStore};

/// Provides local filesystem storage for database backups
pub struct LocalBackupStore {
    /// Directory holding the artifacts
    backup_dir: PathBuf,
}

impl LocalBackupStore {
    /// Create a new LocalBackupStore with the given configuration
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
        }
    }

    /// Read metadata for a single artifact
    async fn read_artifact(&self, filename: &str) -> std::io::Result<BackupArtifact> {
        let metadata = tokio_fs::metadata(self.path_for(filename)).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a regular file", filename),
            ));
        }

        let modified = metadata.modified()?;
        // Not every filesystem records birth time
        let created = metadata.created().unwrap_or(modified);

        Ok(BackupArtifact {
            filename: filename.to_string(),
            size_bytes: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
            modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

#[async_trait]
impl BackupStore for LocalBackupStore {
    async fn ensure_dir(&self) -> Result<()> {
        tokio_fs::create_dir_all(&self.backup_dir).await?;
        Ok(())
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.backup_dir.join(filename)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let artifacts = self.artifacts().await?;
        Ok(artifacts.into_iter().map(|a| a.filename).collect())
    }

    async fn artifacts(&self) -> Result<Vec<BackupArtifact>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio_fs::read_dir(&self.backup_dir).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !is_artifact_name(name) {
                continue;
            }

            match self.read_artifact(name).await {
                Ok(artifact) => artifacts.push(artifact),
                // Removed between read_dir and stat, or not a regular file
                Err(e) => debug!("Skipping {}: {}", name, e),
            }
        }

        // Newest first; ties broken by name so the order is stable
        artifacts.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        Ok(artifacts)
    }

    async fn info(&self, filename: &str) -> BackupInfo {
        if validate_filename(filename).is_err() {
            return BackupInfo::missing(filename);
        }

        match self.read_artifact(filename).await {
            Ok(artifact) => artifact.into(),
            Err(e) if e.kind() == ErrorKind::NotFound => BackupInfo::missing(filename),
            Err(e) => {
                warn!("Failed to get backup info for {}: {}", filename, e);
                BackupInfo::missing(filename)
            }
        }
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;

        let backup_path = self.path_for(filename);
        if !backup_path.is_file() {
            return Err(DatabaseError::NotFound(filename.to_string()));
        }

        match tokio_fs::remove_file(&backup_path).await {
            Ok(()) => {
                info!("Backup deleted: {}", filename);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DatabaseError::NotFound(filename.to_string()))
            }
            Err(e) => Err(DatabaseError::Io(e)),
        }
    }
}

//! Database backup and restore orchestration
//!
//! `BackupManager` drives the external dump and restore procedures through
//! [`DatabaseOps`], keeps artifacts in a [`BackupStore`] and runs retention
//! after every successful backup. Backups and restores share one lock so
//! they never overlap.

use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::PolicyStore;
use crate::database::backup_naming::{BackupNamingService, validate_filename};
use crate::database::ops::DatabaseOps;
use crate::database::retention::{RetentionEnforcer, RetentionReport};
use crate::database::storage::{BackupInfo, BackupStore};
use crate::database::{DatabaseError, Result};

/// Status of a backup or restore operation
#[derive(Debug, Clone, PartialEq)]
pub enum BackupStatus {
    /// Operation completed successfully
    Completed,
    /// Operation failed
    Failed(String),
}

impl BackupStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupStatus::Completed)
    }

    /// Failure message, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            BackupStatus::Completed => None,
            BackupStatus::Failed(msg) => Some(msg.as_str()),
        }
    }
}

/// Options for configuring backup behavior
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// How long to wait after starting the database before using it
    pub startup_grace: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(5),
        }
    }
}

/// Result of a backup operation
#[derive(Debug, Clone)]
pub struct BackupResult {
    /// Name of the artifact, set once a name was generated
    pub filename: Option<String>,
    /// Timestamp when the backup was started
    pub timestamp: DateTime<Utc>,
    /// Duration of the backup operation
    pub duration: Duration,
    /// Size of the backup in bytes
    pub size_bytes: u64,
    /// Status of the backup operation
    pub status: BackupStatus,
}

/// Result of a restore operation
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Artifact that was (or was meant to be) restored
    pub filename: String,
    /// Duration of the restore operation
    pub duration: Duration,
    /// Status of the restore operation
    pub status: BackupStatus,
}

/// Aggregate figures over all stored backups
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size: u64,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
}

/// Manager for database backup operations
pub struct BackupManager {
    /// Where artifacts are kept
    storage: Arc<dyn BackupStore>,
    /// Dump/restore capability
    ops: Arc<dyn DatabaseOps>,
    /// Current retention policy
    policy: Arc<PolicyStore>,
    /// Retention pass run after each backup
    retention: RetentionEnforcer,
    options: BackupOptions,
    /// Mutex to ensure only one backup or restore runs at a time
    backup_mutex: Mutex<()>,
}

impl BackupManager {
    /// Create a new backup manager
    pub fn new(
        storage: Arc<dyn BackupStore>,
        ops: Arc<dyn DatabaseOps>,
        policy: Arc<PolicyStore>,
        options: BackupOptions,
    ) -> Self {
        let retention = RetentionEnforcer::new(storage.clone(), policy.clone());
        Self {
            storage,
            ops,
            policy,
            retention,
            options,
            backup_mutex: Mutex::new(()),
        }
    }

    /// Shared policy this manager reads
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Create a backup of the database
    ///
    /// Never fails outright; problems are reported through
    /// [`BackupResult::status`].
    pub async fn create_backup(&self) -> BackupResult {
        let _lock = self.backup_mutex.lock().await;

        let start_time = Instant::now();
        let timestamp = Utc::now();
        let naming = BackupNamingService::new(&self.policy.get_policy().backup_prefix);
        let filename = naming.generate_filename_with_time(timestamp);

        match self.perform_backup(&filename).await {
            Ok(size_bytes) => {
                info!("Backup created successfully: {}", filename);
                self.retention.enforce().await;

                BackupResult {
                    filename: Some(filename),
                    timestamp,
                    duration: start_time.elapsed(),
                    size_bytes,
                    status: BackupStatus::Completed,
                }
            }
            Err(e) => {
                error!("Backup failed: {}", e);
                BackupResult {
                    filename: Some(filename),
                    timestamp,
                    duration: start_time.elapsed(),
                    size_bytes: 0,
                    status: BackupStatus::Failed(e.to_string()),
                }
            }
        }
    }

    /// Dump into a fresh artifact and return its size
    async fn perform_backup(&self, filename: &str) -> Result<u64> {
        self.storage.ensure_dir().await?;

        if self.storage.exists(filename).await {
            return Err(DatabaseError::Validation(format!(
                "Backup file already exists: {}",
                filename
            )));
        }

        self.ensure_database_running().await?;

        let backup_path = self.storage.path_for(filename);
        info!("Creating database backup {}", backup_path.display());

        if let Err(e) = self.ops.dump(&backup_path).await {
            self.remove_partial(filename).await;
            return Err(e);
        }

        let info = self.storage.info(filename).await;
        if !info.exists {
            return Err(DatabaseError::ExternalProcess(format!(
                "dump finished but {} was not written",
                filename
            )));
        }
        if info.size_bytes == 0 {
            self.remove_partial(filename).await;
            return Err(DatabaseError::ExternalProcess(format!(
                "dump finished but {} is empty",
                filename
            )));
        }

        Ok(info.size_bytes)
    }

    /// Do not leave a truncated dump behind looking like a valid backup
    async fn remove_partial(&self, filename: &str) {
        if self.storage.exists(filename).await {
            if let Err(cleanup) = self.storage.delete(filename).await {
                warn!("Failed to remove partial backup {}: {}", filename, cleanup);
            }
        }
    }

    /// Restore the database from a stored backup
    ///
    /// Replaces the live contents; there is no snapshot and no retry.
    pub async fn restore_backup(&self, filename: &str) -> RestoreResult {
        let _lock = self.backup_mutex.lock().await;
        let start_time = Instant::now();

        let status = match self.perform_restore(filename).await {
            Ok(()) => {
                info!("Database restored successfully from {}", filename);
                BackupStatus::Completed
            }
            Err(e) => {
                error!("Restore failed: {}", e);
                BackupStatus::Failed(e.to_string())
            }
        };

        RestoreResult {
            filename: filename.to_string(),
            duration: start_time.elapsed(),
            status,
        }
    }

    async fn perform_restore(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;

        if !self.storage.exists(filename).await {
            return Err(DatabaseError::NotFound(filename.to_string()));
        }

        self.ensure_database_running().await?;

        info!("Restoring database from backup: {}", filename);
        self.ops.restore(&self.storage.path_for(filename)).await
    }

    /// Start the database if it is not reachable and give it time to come up
    async fn ensure_database_running(&self) -> Result<()> {
        if self.ops.is_running().await {
            return Ok(());
        }

        warn!("Database not running, starting it...");
        self.ops.start().await?;
        tokio::time::sleep(self.options.startup_grace).await;
        Ok(())
    }

    /// List all available backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<String>> {
        self.storage.list().await
    }

    /// Look up a single backup; reports `exists: false` instead of failing
    pub async fn backup_info(&self, filename: &str) -> BackupInfo {
        self.storage.info(filename).await
    }

    /// Delete a backup
    pub async fn delete_backup(&self, filename: &str) -> Result<()> {
        self.storage.delete(filename).await
    }

    /// Apply the retention policy now
    pub async fn cleanup_old_backups(&self) -> RetentionReport {
        self.retention.enforce().await
    }

    /// Count, total size and age range of all backups
    pub async fn backup_stats(&self) -> BackupStats {
        let artifacts = match self.storage.artifacts().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("Failed to get backup stats: {}", e);
                return BackupStats::default();
            }
        };

        BackupStats {
            total_backups: artifacts.len(),
            total_size: artifacts.iter().map(|a| a.size_bytes).sum(),
            oldest_backup: artifacts.iter().map(|a| a.created_at).min(),
            newest_backup: artifacts.iter().map(|a| a.created_at).max(),
        }
    }
}

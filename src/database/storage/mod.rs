//! Storage module for backup artifacts
//!
//! This module provides an abstraction over where backup artifacts live so
//! the backup manager and retention enforcer can be exercised against an
//! in-memory store in tests and a directory on disk in production.

use std::path::PathBuf;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::Result;

pub mod local_storage;

/// A backup artifact as observed in storage
#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    /// File name, the artifact's only identifier
    pub filename: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation time reported by the storage backend
    pub created_at: DateTime<Utc>,
    /// Last modification time reported by the storage backend
    pub modified_at: DateTime<Utc>,
}

/// Result of a non-failing artifact lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub exists: bool,
}

impl BackupInfo {
    /// Info describing an artifact that is not there
    pub fn missing(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            size_bytes: 0,
            created_at: None,
            exists: false,
        }
    }
}

impl From<BackupArtifact> for BackupInfo {
    fn from(artifact: BackupArtifact) -> Self {
        Self {
            filename: artifact.filename,
            size_bytes: artifact.size_bytes,
            created_at: Some(artifact.created_at),
            exists: true,
        }
    }
}

/// Provides a unified interface for backup artifact storage
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Create the storage location if it does not exist yet
    async fn ensure_dir(&self) -> Result<()>;

    /// Full path where an artifact with the given name is (or would be) stored
    fn path_for(&self, filename: &str) -> PathBuf;

    /// List artifact names, newest first by modification time
    async fn list(&self) -> Result<Vec<String>>;

    /// List artifacts with their metadata, newest first by modification time
    async fn artifacts(&self) -> Result<Vec<BackupArtifact>>;

    /// Look up an artifact; never fails, reports `exists: false` instead
    async fn info(&self, filename: &str) -> BackupInfo;

    /// Check whether an artifact exists
    async fn exists(&self, filename: &str) -> bool {
        self.info(filename).await.exists
    }

    /// Delete an artifact
    ///
    /// Fails with [`DatabaseError::NotFound`](crate::database::DatabaseError::NotFound)
    /// when there is nothing to delete.
    async fn delete(&self, filename: &str) -> Result<()>;
}

//! Backup naming module for generating and validating artifact filenames
//!
//! Artifacts are named `<prefix>-<timestamp>.sql`, where the timestamp is an
//! ISO 8601 UTC instant with `:` and `.` replaced by `-` so the name is safe
//! on every filesystem, e.g. `auto-backup-2025-06-01T14-30-00-123Z.sql`.

use chrono::{DateTime, Utc};

use crate::database::{DatabaseError, Result};

/// File extension shared by every backup artifact
pub const ARTIFACT_EXTENSION: &str = ".sql";

/// Service for generating backup filenames
#[derive(Debug, Clone)]
pub struct BackupNamingService {
    /// Prefix placed in front of the timestamp
    prefix: String,
}

impl BackupNamingService {
    /// Create a new naming service with the given prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Generate a filename for a backup taken at `timestamp`
    pub fn generate_filename_with_time(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}-{}{}",
            self.prefix,
            timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ"),
            ARTIFACT_EXTENSION
        )
    }
}

/// Check a caller-supplied filename before it is joined onto the backup directory
///
/// The name must be a bare file name (no separators, no `..`) ending in `.sql`.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(DatabaseError::Validation("Filename is required".to_string()));
    }

    let has_separator = filename.contains('/') || filename.contains('\\');
    let stem = filename.strip_suffix(ARTIFACT_EXTENSION).unwrap_or("");
    if has_separator || filename.starts_with('.') || stem.is_empty() {
        return Err(DatabaseError::Validation(format!(
            "Invalid backup filename: {}",
            filename
        )));
    }

    Ok(())
}

/// Whether a directory entry name follows the artifact naming convention
pub fn is_artifact_name(filename: &str) -> bool {
    validate_filename(filename).is_ok()
}

/// Check a naming prefix; it ends up inside a filename so the same rules apply
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.trim().is_empty() {
        return Err(DatabaseError::Validation(
            "backupPrefix must not be empty".to_string(),
        ));
    }
    if prefix.contains('/') || prefix.contains('\\') || prefix.starts_with('.') {
        return Err(DatabaseError::Validation(format!(
            "backupPrefix contains illegal characters: {}",
            prefix
        )));
    }
    Ok(())
}

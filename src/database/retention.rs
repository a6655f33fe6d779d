//! Retention policy enforcement
//!
//! An enforcement pass evaluates two caps independently against the full
//! artifact listing and deletes the union of what they select:
//!
//! * count cap: everything beyond the `max_backups` newest artifacts
//! * age cap: everything created before `now - retention_days`
//!
//! The pass is best-effort. A failed deletion is logged and recorded in the
//! report, and the remaining deletions still run.

use std::collections::HashSet;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::{PolicyStore, RetentionPolicy};
use crate::database::DatabaseError;
use crate::database::storage::{BackupArtifact, BackupStore};

/// Artifacts selected for deletion by each cap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPlan {
    /// Artifacts beyond the `max_backups` newest, newest first
    pub over_count: Vec<String>,
    /// Artifacts older than the retention window, newest first
    pub expired: Vec<String>,
}

impl RetentionPlan {
    /// Decide which artifacts violate `policy` at time `now`
    pub fn build(
        artifacts: &[BackupArtifact],
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut sorted: Vec<&BackupArtifact> = artifacts.iter().collect();
        sorted.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        let over_count = sorted
            .iter()
            .skip(policy.max_backups as usize)
            .map(|a| a.filename.clone())
            .collect();

        // A cutoff before the earliest representable time selects nothing
        let window = Duration::days(i64::from(policy.retention_days));
        let expired = match now.checked_sub_signed(window) {
            Some(cutoff) => sorted
                .iter()
                .filter(|a| a.created_at < cutoff)
                .map(|a| a.filename.clone())
                .collect(),
            None => Vec::new(),
        };

        Self { over_count, expired }
    }

    /// Union of both selections, each artifact listed once
    pub fn deletions(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.over_count
            .iter()
            .chain(self.expired.iter())
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.over_count.is_empty() && self.expired.is_empty()
    }
}

/// A deletion that did not go through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionFailure {
    pub filename: String,
    pub error: String,
}

/// Outcome of one enforcement pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    /// Number of artifacts in the listing
    pub examined: usize,
    /// Selected by the count cap
    pub over_count: usize,
    /// Selected by the age cap
    pub expired: usize,
    /// Artifacts actually removed
    pub deleted: Vec<String>,
    /// Deletions that failed
    pub failed: Vec<RetentionFailure>,
}

impl RetentionReport {
    /// Artifacts still present after the pass
    pub fn kept(&self) -> usize {
        self.examined.saturating_sub(self.deleted.len())
    }
}

/// Applies the retention policy to a backup store
pub struct RetentionEnforcer {
    store: Arc<dyn BackupStore>,
    policy: Arc<PolicyStore>,
}

impl RetentionEnforcer {
    /// Create a new enforcer over `store` governed by `policy`
    pub fn new(store: Arc<dyn BackupStore>, policy: Arc<PolicyStore>) -> Self {
        Self { store, policy }
    }

    /// Run one enforcement pass against the current time
    pub async fn enforce(&self) -> RetentionReport {
        self.enforce_at(Utc::now()).await
    }

    /// Run one enforcement pass treating `now` as the current time
    pub async fn enforce_at(&self, now: DateTime<Utc>) -> RetentionReport {
        // One snapshot for the whole pass
        let policy = self.policy.get_policy();

        let artifacts = match self.store.artifacts().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("Backup cleanup failed: {}", e);
                return RetentionReport::default();
            }
        };

        let plan = RetentionPlan::build(&artifacts, &policy, now);
        if plan.is_empty() {
            debug!("No backups violate the retention policy");
        }
        let mut report = RetentionReport {
            examined: artifacts.len(),
            over_count: plan.over_count.len(),
            expired: plan.expired.len(),
            ..RetentionReport::default()
        };

        for filename in plan.deletions() {
            match self.store.delete(filename).await {
                Ok(()) => {
                    info!("Deleted old backup: {}", filename);
                    report.deleted.push(filename.to_string());
                }
                Err(DatabaseError::NotFound(_)) => {
                    debug!("Backup {} already gone", filename);
                }
                Err(e) => {
                    error!("Failed to delete backup {}: {}", filename, e);
                    report.failed.push(RetentionFailure {
                        filename: filename.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Backup cleanup completed. Kept {} of {} backups (max {}, {} days).",
            report.kept(),
            report.examined,
            policy.max_backups,
            policy.retention_days
        );

        report
    }
}

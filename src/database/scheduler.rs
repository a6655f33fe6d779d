//! Scheduled backups
//!
//! A single trigger is wired: once a day at local midnight, gated by
//! `enable_midnight_backup`. The toggle is read at every firing so it can be
//! flipped at runtime without restarting the scheduler.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Days, Local, NaiveDateTime, TimeZone};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::database::backup::{BackupManager, BackupResult};
use crate::database::{DatabaseError, Result};

/// Runs the daily backup in a background task
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    handle: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    /// Create a new scheduler; nothing runs until [`start`](Self::start)
    pub fn new(manager: Arc<BackupManager>) -> Self {
        Self {
            manager,
            handle: None,
        }
    }

    /// Start the scheduling loop
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(DatabaseError::Config("Scheduler already running".to_string()));
        }

        let manager = self.manager.clone();
        self.handle = Some(tokio::spawn(run_midnight_backups(manager)));

        info!("Backup scheduler started");
        Ok(())
    }

    /// Stop the scheduling loop
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Backup scheduler stopped");
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// First midnight strictly after `now`
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let tomorrow = now
        .date()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date());
    tomorrow.and_time(chrono::NaiveTime::MIN)
}

/// Wall-clock time from `now` until the next midnight in its time zone
///
/// Both ends are resolved to real instants, so a daylight saving shift in
/// between lengthens or shortens the wait accordingly.
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    let midnight = next_midnight(now.naive_local());
    // Zones that jump over midnight start the day at 01:00
    let target = tz
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
        });

    target
        .and_then(|t| t.signed_duration_since(now.clone()).to_std().ok())
        .unwrap_or(Duration::from_secs(60))
}

async fn run_midnight_backups(manager: Arc<BackupManager>) {
    loop {
        let wait = until_next_midnight(&Local::now());
        debug!("Next scheduled backup in {:?}", wait);
        tokio::time::sleep(wait).await;

        run_scheduled_backup(&manager).await;
    }
}

/// One firing of the schedule; `None` when midnight backups are disabled
async fn run_scheduled_backup(manager: &BackupManager) -> Option<BackupResult> {
    if !manager.policy().get_policy().enable_midnight_backup {
        debug!("Midnight backup disabled, skipping");
        return None;
    }

    info!("Starting scheduled backup at midnight...");
    let result = manager.create_backup().await;
    if result.status.is_success() {
        info!(
            "Scheduled backup completed successfully: {} ({} bytes in {:?})",
            result.filename.as_deref().unwrap_or_default(),
            result.size_bytes,
            result.duration
        );
    } else {
        error!(
            "Scheduled backup failed: {}",
            result.status.error().unwrap_or("unknown error")
        );
    }
    Some(result)
}

use std::env;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::backup_naming::validate_prefix;
use crate::database::{DatabaseError, Result};

const DEFAULT_MAX_BACKUPS: u32 = 30;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_PREFIX: &str = "auto-backup";
/// Upper bound on `retention_days`, roughly a century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Retention and scheduling policy for database backups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Maximum number of backups to keep
    pub max_backups: u32,
    /// Number of days a backup is kept
    pub retention_days: u32,
    /// Run the daily backup at midnight
    pub enable_midnight_backup: bool,
    /// Declared for six-hourly backups; no trigger is wired to it
    pub enable_frequent_backup: bool,
    /// Declared for weekly backups; no trigger is wired to it
    pub enable_weekly_backup: bool,
    /// Prefix used when naming new backups
    pub backup_prefix: String,
    /// Declared but not consulted by the dump path
    pub compression_enabled: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
            retention_days: DEFAULT_RETENTION_DAYS,
            enable_midnight_backup: true,
            enable_frequent_backup: false,
            enable_weekly_backup: false,
            backup_prefix: String::from(DEFAULT_PREFIX),
            compression_enabled: false,
        }
    }
}

impl RetentionPolicy {
    /// Load the policy from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the policy from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bounded = |key: &str, default: u32, max: u32| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| (1..=max).contains(v))
                .unwrap_or(default)
        };

        let backup_prefix = lookup("BACKUP_PREFIX")
            .filter(|p| validate_prefix(p).is_ok())
            .unwrap_or_else(|| String::from(DEFAULT_PREFIX));

        Self {
            max_backups: bounded("BACKUP_MAX_COUNT", DEFAULT_MAX_BACKUPS, u32::MAX),
            retention_days: bounded(
                "BACKUP_RETENTION_DAYS",
                DEFAULT_RETENTION_DAYS,
                MAX_RETENTION_DAYS,
            ),
            // Midnight backups are opt-out, the others opt-in
            enable_midnight_backup: lookup("BACKUP_MIDNIGHT_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
            enable_frequent_backup: lookup("BACKUP_FREQUENT_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            enable_weekly_backup: lookup("BACKUP_WEEKLY_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            backup_prefix,
            compression_enabled: lookup("BACKUP_COMPRESSION_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
        }
    }

    /// Reject values the retention enforcer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_backups == 0 {
            return Err(DatabaseError::Validation(
                "maxBackups must be greater than zero".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(DatabaseError::Validation(
                "retentionDays must be greater than zero".to_string(),
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(DatabaseError::Validation(format!(
                "retentionDays must be at most {}",
                MAX_RETENTION_DAYS
            )));
        }
        validate_prefix(&self.backup_prefix)
    }
}

/// Partial update to a [`RetentionPolicy`]; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    pub max_backups: Option<u32>,
    pub retention_days: Option<u32>,
    pub enable_midnight_backup: Option<bool>,
    pub enable_frequent_backup: Option<bool>,
    pub enable_weekly_backup: Option<bool>,
    pub backup_prefix: Option<String>,
    pub compression_enabled: Option<bool>,
}

impl PolicyUpdate {
    fn apply_to(self, policy: &mut RetentionPolicy) {
        if let Some(v) = self.max_backups {
            policy.max_backups = v;
        }
        if let Some(v) = self.retention_days {
            policy.retention_days = v;
        }
        if let Some(v) = self.enable_midnight_backup {
            policy.enable_midnight_backup = v;
        }
        if let Some(v) = self.enable_frequent_backup {
            policy.enable_frequent_backup = v;
        }
        if let Some(v) = self.enable_weekly_backup {
            policy.enable_weekly_backup = v;
        }
        if let Some(v) = self.backup_prefix {
            policy.backup_prefix = v;
        }
        if let Some(v) = self.compression_enabled {
            policy.compression_enabled = v;
        }
    }
}

/// Shared, runtime-mutable holder of the current retention policy
#[derive(Debug)]
pub struct PolicyStore {
    policy: RwLock<RetentionPolicy>,
}

impl PolicyStore {
    /// Create a store holding the given policy
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Snapshot of the current policy
    pub fn get_policy(&self) -> RetentionPolicy {
        self.policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Merge `update` over the current policy
    ///
    /// The merged policy is validated as a whole; on failure the stored
    /// policy is left as it was.
    pub fn update_policy(&self, update: PolicyUpdate) -> Result<RetentionPolicy> {
        let mut guard = self
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut merged = guard.clone();
        update.apply_to(&mut merged);
        merged.validate()?;

        *guard = merged.clone();
        Ok(merged)
    }
}

/// Connection parameters for the PostgreSQL instance being backed up
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    /// Docker container running the database
    pub container: String,
    /// docker compose service that starts the container
    pub compose_service: String,
    /// Program used to reach the container
    pub docker_bin: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            username: String::from("postgres"),
            password: String::new(),
            name: String::from("postgres"),
            container: String::from("rental-db"),
            compose_service: String::from("db"),
            docker_bin: String::from("docker"),
        }
    }
}

/// Service-level settings that are fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding backup artifacts
    pub backup_dir: PathBuf,
    /// Database being backed up
    pub database: DatabaseConfig,
    /// How long to wait after starting the database before using it
    pub startup_grace: Duration,
    /// HTTP listen port
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            database: DatabaseConfig::default(),
            startup_grace: Duration::from_secs(5),
            port: 6001,
        }
    }
}

impl ServiceConfig {
    /// Load service configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let db_defaults = defaults.database;
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let database = DatabaseConfig {
            host: text("DB_HOST", db_defaults.host),
            port: lookup("DB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(db_defaults.port),
            username: text("DB_USERNAME", db_defaults.username),
            password: text("DB_PASSWORD", db_defaults.password),
            name: text("DB_NAME", db_defaults.name),
            container: text("DB_CONTAINER", db_defaults.container),
            compose_service: text("DB_COMPOSE_SERVICE", db_defaults.compose_service),
            docker_bin: text("DOCKER_BIN", db_defaults.docker_bin),
        };

        let startup_grace = lookup("BACKUP_STARTUP_GRACE_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.startup_grace);

        Self {
            backup_dir: lookup("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            database,
            startup_grace,
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

//! Operations against the live database process
//!
//! The backup manager never shells out directly; it goes through
//! [`DatabaseOps`] so tests can substitute a mock for the real tools.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tokio::fs as tokio_fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::database::{DatabaseError, Result};

/// Upper bound on the reachability probe, not on dump or restore
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability to supervise, dump and restore the database
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseOps: Send + Sync {
    /// Whether the database is up and accepting connections
    async fn is_running(&self) -> bool;

    /// Best-effort start of the database; it may need a while to become ready
    async fn start(&self) -> Result<()>;

    /// Write a full textual dump of the database to `output`
    async fn dump(&self, output: &Path) -> Result<()>;

    /// Replace the live database contents with the dump at `input`
    async fn restore(&self, input: &Path) -> Result<()>;
}

/// PostgreSQL running in a docker container, dumped with `pg_dump` and
/// restored with `psql` through `docker exec`
#[derive(Debug, Clone)]
pub struct PostgresOps {
    config: DatabaseConfig,
}

impl PostgresOps {
    /// Create a new PostgresOps for the given connection parameters
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.username)
            .password(&self.config.password)
            .database(&self.config.name)
    }

    /// The container tool, carrying the password in its environment
    fn docker(&self) -> Command {
        let mut command = Command::new(&self.config.docker_bin);
        if !self.config.password.is_empty() {
            command.env("PGPASSWORD", &self.config.password);
        }
        command
    }

    /// Arguments for `docker` that start the database service
    fn start_args(&self) -> Vec<String> {
        vec![
            "compose".to_string(),
            "up".to_string(),
            "-d".to_string(),
            self.config.compose_service.clone(),
        ]
    }

    /// Arguments for `docker` that run `tool` inside the database container
    fn exec_args(&self, interactive: bool, tool: &str) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        // Name only: docker copies the value from its own environment
        if !self.config.password.is_empty() {
            args.push("-e".to_string());
            args.push("PGPASSWORD".to_string());
        }
        args.extend([
            self.config.container.clone(),
            tool.to_string(),
            "-U".to_string(),
            self.config.username.clone(),
            "-d".to_string(),
            self.config.name.clone(),
        ]);
        args
    }

    fn dump_args(&self) -> Vec<String> {
        self.exec_args(false, "pg_dump")
    }

    fn restore_args(&self) -> Vec<String> {
        let mut args = self.exec_args(true, "psql");
        // Stop at the first failing statement so a bad dump surfaces as an error
        args.extend(["-v".to_string(), "ON_ERROR_STOP=1".to_string()]);
        args
    }

    /// Run a prepared command and turn a non-zero exit into an error
    ///
    /// Only stderr is captured; stdin and stdout keep whatever the caller
    /// configured.
    async fn run(command: &mut Command, what: &str) -> Result<Output> {
        let spawn_error =
            |e: std::io::Error| DatabaseError::ExternalProcess(format!("failed to run {}: {}", what, e));
        let child = command.stderr(Stdio::piped()).spawn().map_err(spawn_error)?;
        let output = child.wait_with_output().await.map_err(spawn_error)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DatabaseError::ExternalProcess(format!(
                "{} exited with {}: {}",
                what,
                output.status,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl DatabaseOps for PostgresOps {
    async fn is_running(&self) -> bool {
        let probe = async {
            let mut conn = PgConnection::connect_with(&self.connect_options()).await?;
            let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&mut conn).await?;
            conn.close().await?;
            Ok::<bool, sqlx::Error>(one == 1)
        };

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                debug!("Database probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Database probe timed out after {:?}", PROBE_TIMEOUT);
                false
            }
        }
    }

    async fn start(&self) -> Result<()> {
        info!("Starting database service {}", self.config.compose_service);
        Self::run(
            self.docker().args(self.start_args()).stdout(Stdio::null()),
            "docker compose up",
        )
        .await?;
        Ok(())
    }

    async fn dump(&self, output: &Path) -> Result<()> {
        let file = tokio_fs::File::create(output).await?.into_std().await;
        Self::run(
            self.docker().args(self.dump_args()).stdout(file),
            "pg_dump",
        )
        .await?;
        Ok(())
    }

    async fn restore(&self, input: &Path) -> Result<()> {
        let file = tokio_fs::File::open(input).await?.into_std().await;
        Self::run(
            self.docker()
                .args(self.restore_args())
                .stdin(file)
                .stdout(Stdio::null()),
            "psql",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            username: String::from("rental"),
            name: String::from("rental_db"),
            container: String::from("rental-db"),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_dump_args() {
        let ops = PostgresOps::new(test_config());
        assert_eq!(
            ops.dump_args(),
            vec!["exec", "rental-db", "pg_dump", "-U", "rental", "-d", "rental_db"]
        );
    }

    #[test]
    fn test_restore_args_pass_password_and_stdin() {
        let ops = PostgresOps::new(DatabaseConfig {
            password: String::from("secret"),
            ..test_config()
        });
        assert_eq!(
            ops.restore_args(),
            vec![
                "exec", "-i", "-e", "PGPASSWORD", "rental-db", "psql", "-U", "rental",
                "-d", "rental_db", "-v", "ON_ERROR_STOP=1"
            ]
        );
    }

    #[test]
    fn test_password_stays_off_the_command_line() {
        let ops = PostgresOps::new(DatabaseConfig {
            password: String::from("secret"),
            ..test_config()
        });

        assert!(ops.dump_args().iter().all(|arg| !arg.contains("secret")));
        let command = ops.docker();
        assert!(
            command
                .as_std()
                .get_envs()
                .any(|(key, value)| key == "PGPASSWORD" && value == Some(OsStr::new("secret")))
        );
    }

    #[test]
    fn test_start_args() {
        let ops = PostgresOps::new(test_config());
        assert_eq!(ops.start_args(), vec!["compose", "up", "-d", "db"]);
    }

    #[tokio::test]
    async fn test_unreachable_database_is_not_running() {
        let ops = PostgresOps::new(DatabaseConfig {
            host: String::from("127.0.0.1"),
            // Nothing listens on port 1
            port: 1,
            ..test_config()
        });

        assert!(!ops.is_running().await);
    }

    /// Write an executable shell script standing in for the docker CLI
    #[cfg(unix)]
    fn fake_docker(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dump_streams_output_into_artifact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let docker_bin = fake_docker(
            temp_dir.path(),
            r#"printf '%s\n' '-- PostgreSQL database dump' "$*" "password=$PGPASSWORD""#,
        );
        let ops = PostgresOps::new(DatabaseConfig {
            password: String::from("secret"),
            docker_bin,
            ..test_config()
        });
        let artifact = temp_dir.path().join("auto-backup-test.sql");

        ops.dump(&artifact).await.unwrap();

        let contents = std::fs::read_to_string(&artifact).unwrap();
        assert_eq!(
            contents,
            "-- PostgreSQL database dump\n\
             exec -e PGPASSWORD rental-db pg_dump -U rental -d rental_db\n\
             password=secret\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dump_failure_reports_stderr() {
        let temp_dir = tempfile::tempdir().unwrap();
        let docker_bin = fake_docker(temp_dir.path(), "echo 'connection refused' >&2\nexit 2");
        let ops = PostgresOps::new(DatabaseConfig {
            docker_bin,
            ..test_config()
        });

        let result = ops.dump(&temp_dir.path().join("failed.sql")).await;

        match result {
            Err(DatabaseError::ExternalProcess(msg)) => {
                assert!(msg.starts_with("pg_dump exited with"));
                assert!(msg.ends_with("connection refused"));
            }
            other => panic!("expected ExternalProcess, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_feeds_artifact_on_stdin() {
        let temp_dir = tempfile::tempdir().unwrap();
        let received = temp_dir.path().join("received.sql");
        let docker_bin = fake_docker(
            temp_dir.path(),
            &format!("cat > '{}'\necho SET", received.display()),
        );
        let ops = PostgresOps::new(DatabaseConfig {
            docker_bin,
            ..test_config()
        });
        let artifact = temp_dir.path().join("auto-backup-test.sql");
        std::fs::write(&artifact, "CREATE TABLE homes (id int);\n").unwrap();

        ops.restore(&artifact).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&received).unwrap(),
            "CREATE TABLE homes (id int);\n"
        );
    }
}

//! HTTP surface for the backup subsystem
//!
//! Every handler answers with the same envelope:
//! `{ status, message, data?, timestamp }`.

use std::sync::Arc;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::PolicyUpdate;
use crate::database::DatabaseError;
use crate::database::backup::BackupManager;
use crate::database::backup_naming::validate_filename;

/// Shared state handed to every handler
pub struct AppState {
    pub manager: Arc<BackupManager>,
}

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn success(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self::new(status, message, Some(data))
    }
}

impl ApiResponse<Value> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, message, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<DatabaseError> for ApiResponse<Value> {
    fn from(error: DatabaseError) -> Self {
        let status = match &error {
            DatabaseError::NotFound(_) => StatusCode::NOT_FOUND,
            DatabaseError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::error(status, error.to_string())
    }
}

impl From<JsonRejection> for ApiResponse<Value> {
    fn from(rejection: JsonRejection) -> Self {
        Self::error(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

/// Build the router, mounted under `/api/v1/backup`
pub fn router(state: Arc<AppState>) -> Router {
    let backup = Router::new()
        .route("/create", post(create_backup_handler))
        .route("/restore", post(restore_backup_handler))
        .route("/list", get(list_backups_handler))
        .route("/info/{filename}", get(backup_info_handler))
        .route("/stats", get(backup_stats_handler))
        .route("/config", get(get_config_handler).put(update_config_handler))
        .route("/cleanup", post(cleanup_handler))
        .route("/{filename}", delete(delete_backup_handler));

    Router::new()
        .nest("/api/v1/backup", backup)
        .with_state(state)
}

// Handler to create a backup on demand
async fn create_backup_handler(State(state): State<Arc<AppState>>) -> ApiResponse<Value> {
    let result = state.manager.create_backup().await;

    match result.status.error() {
        None => ApiResponse::success(
            StatusCode::CREATED,
            "Backup created successfully",
            json!({
                "filename": result.filename,
                "size": result.size_bytes,
                "startedAt": result.timestamp,
                "durationMs": result.duration.as_millis() as u64,
            }),
        ),
        Some(e) => ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
struct RestoreRequest {
    filename: Option<String>,
}

// Handler to restore the database from a stored backup
async fn restore_backup_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> ApiResponse<Value> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return rejection.into(),
    };
    let filename = body.filename.unwrap_or_default();
    if let Err(e) = validate_filename(&filename) {
        return e.into();
    }
    if !state.manager.backup_info(&filename).await.exists {
        return DatabaseError::NotFound(filename).into();
    }

    let result = state.manager.restore_backup(&filename).await;
    match result.status.error() {
        None => ApiResponse::success(
            StatusCode::OK,
            "Database restored successfully",
            json!({
                "filename": result.filename,
                "durationMs": result.duration.as_millis() as u64,
            }),
        ),
        Some(e) => ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// Handler to list backups with their details, newest first
async fn list_backups_handler(State(state): State<Arc<AppState>>) -> ApiResponse<Value> {
    let backups = match state.manager.list_backups().await {
        Ok(backups) => backups,
        Err(e) => return e.into(),
    };

    let mut details = Vec::with_capacity(backups.len());
    for filename in backups {
        let info = state.manager.backup_info(&filename).await;
        details.push(json!({
            "filename": filename,
            "size": info.size_bytes,
            "created": info.created_at,
            "exists": info.exists,
        }));
    }

    ApiResponse::success(StatusCode::OK, "Backups listed", json!({ "backups": details }))
}

async fn backup_info_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResponse<Value> {
    let info = state.manager.backup_info(&filename).await;
    if !info.exists {
        return DatabaseError::NotFound(filename).into();
    }

    ApiResponse::success(
        StatusCode::OK,
        "Backup info retrieved",
        json!({
            "filename": info.filename,
            "size": info.size_bytes,
            "created": info.created_at,
            "sizeFormatted": format_bytes(info.size_bytes),
        }),
    )
}

async fn delete_backup_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResponse<Value> {
    match state.manager.delete_backup(&filename).await {
        Ok(()) => ApiResponse::success(
            StatusCode::OK,
            "Backup deleted successfully",
            json!({ "filename": filename }),
        ),
        Err(e) => e.into(),
    }
}

async fn backup_stats_handler(State(state): State<Arc<AppState>>) -> ApiResponse<Value> {
    let stats = state.manager.backup_stats().await;

    ApiResponse::success(
        StatusCode::OK,
        "Backup statistics",
        json!({
            "totalBackups": stats.total_backups,
            "totalSize": stats.total_size,
            "oldestBackup": stats.oldest_backup,
            "newestBackup": stats.newest_backup,
            "totalSizeFormatted": format_bytes(stats.total_size),
        }),
    )
}

async fn get_config_handler(State(state): State<Arc<AppState>>) -> ApiResponse<Value> {
    let policy = state.manager.policy().get_policy();
    ApiResponse::success(StatusCode::OK, "Backup configuration", json!(policy))
}

async fn update_config_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PolicyUpdate>, JsonRejection>,
) -> ApiResponse<Value> {
    let update = match payload {
        Ok(Json(update)) => update,
        Err(rejection) => return rejection.into(),
    };
    match state.manager.policy().update_policy(update) {
        Ok(policy) => ApiResponse::success(
            StatusCode::OK,
            "Backup configuration updated successfully",
            json!({ "config": policy }),
        ),
        Err(e) => e.into(),
    }
}

async fn cleanup_handler(State(state): State<Arc<AppState>>) -> ApiResponse<Value> {
    let report = state.manager.cleanup_old_backups().await;
    ApiResponse::success(
        StatusCode::OK,
        "Backup cleanup completed successfully",
        json!(report),
    )
}

/// Human-readable size in base-1024 units, e.g. `1.5 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return String::from("0 Bytes");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path as FsPath;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Duration;
    use tower::ServiceExt;

    use crate::config::{PolicyStore, RetentionPolicy};
    use crate::database::backup::BackupOptions;
    use crate::database::ops::MockDatabaseOps;
    use crate::database::retention::tests::{MemoryStore, artifact};
    use crate::database::storage::BackupStore;

    fn app_with(store: Arc<dyn BackupStore>, ops: MockDatabaseOps) -> Router {
        let manager = BackupManager::new(
            store,
            Arc::new(ops),
            Arc::new(PolicyStore::new(RetentionPolicy::default())),
            BackupOptions {
                startup_grace: std::time::Duration::ZERO,
            },
        );
        router(Arc::new(AppState {
            manager: Arc::new(manager),
        }))
    }

    fn sample_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_artifacts(vec![
            artifact("auto-backup-a.sql", Duration::hours(1)),
            artifact("auto-backup-b.sql", Duration::hours(2)),
        ]))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(500), "500 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_048_576), "1 MB");
        assert_eq!(format_bytes(1_288_490_189), "1.2 GB");
    }

    #[tokio::test]
    async fn test_list_backups() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) = send(app, "GET", "/api/v1/backup/list", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert!(body["timestamp"].is_string());
        let backups = body["data"]["backups"].as_array().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0]["filename"], "auto-backup-a.sql");
        assert_eq!(backups[0]["size"], 1024);
        assert_eq!(backups[0]["exists"], true);
    }

    #[tokio::test]
    async fn test_backup_info_not_found() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) = send(app, "GET", "/api/v1/backup/info/missing.sql", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Backup file not found: missing.sql");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_backup_info_found() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) =
            send(app, "GET", "/api/v1/backup/info/auto-backup-a.sql", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["sizeFormatted"], "1 KB");
    }

    #[tokio::test]
    async fn test_delete_backup() {
        let store = sample_store();
        let app = app_with(store.clone(), MockDatabaseOps::new());

        let (status, _) = send(app.clone(), "DELETE", "/api/v1/backup/auto-backup-b.sql", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.names(), vec!["auto-backup-a.sql"]);

        let (status, body) = send(app, "DELETE", "/api/v1/backup/auto-backup-b.sql", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Backup file not found: auto-backup-b.sql");
    }

    #[tokio::test]
    async fn test_restore_requires_filename() {
        let mut ops = MockDatabaseOps::new();
        ops.expect_restore().never();
        let app = app_with(sample_store(), ops);

        let (status, body) = send(app, "POST", "/api/v1/backup/restore", Some("{}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Filename is required");
    }

    #[tokio::test]
    async fn test_restore_rejects_malformed_body() {
        let mut ops = MockDatabaseOps::new();
        ops.expect_restore().never();
        let app = app_with(sample_store(), ops);

        for body in ["not json", r#"{"filename": 42}"#] {
            let (status, response) =
                send(app.clone(), "POST", "/api/v1/backup/restore", Some(body)).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response["status"], 400);
            assert!(response["message"].is_string());
            assert!(response["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn test_restore_missing_backup() {
        let mut ops = MockDatabaseOps::new();
        ops.expect_is_running().never();
        ops.expect_restore().never();
        let app = app_with(sample_store(), ops);

        let (status, body) = send(
            app,
            "POST",
            "/api/v1/backup/restore",
            Some(r#"{"filename":"missing.sql"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Backup file not found: missing.sql");
    }

    #[tokio::test]
    async fn test_restore_backup() {
        let mut ops = MockDatabaseOps::new();
        ops.expect_is_running().returning(|| true);
        ops.expect_restore()
            .times(1)
            .returning(|_: &FsPath| Ok(()));
        let app = app_with(sample_store(), ops);

        let (status, body) = send(
            app,
            "POST",
            "/api/v1/backup/restore",
            Some(r#"{"filename":"auto-backup-a.sql"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Database restored successfully");
        assert_eq!(body["data"]["filename"], "auto-backup-a.sql");
    }

    #[tokio::test]
    async fn test_create_backup_failure_is_reported() {
        let mut ops = MockDatabaseOps::new();
        ops.expect_is_running().returning(|| true);
        ops.expect_dump().returning(|_: &FsPath| {
            Err(DatabaseError::ExternalProcess("pg_dump exited with 1".to_string()))
        });
        let app = app_with(sample_store(), ops);

        let (status, body) = send(app, "POST", "/api/v1/backup/create", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "External process failed: pg_dump exited with 1");
    }

    #[tokio::test]
    async fn test_create_backup_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::database::storage::local_storage::LocalBackupStore::new(
            &crate::config::ServiceConfig {
                backup_dir: temp_dir.path().to_path_buf(),
                ..Default::default()
            },
        ));
        let mut ops = MockDatabaseOps::new();
        ops.expect_is_running().returning(|| true);
        ops.expect_dump().returning(|path: &FsPath| {
            std::fs::write(path, "-- dump")?;
            Ok(())
        });
        let app = app_with(store, ops);

        let (status, body) = send(app, "POST", "/api/v1/backup/create", None).await;

        assert_eq!(status, StatusCode::CREATED);
        let filename = body["data"]["filename"].as_str().unwrap();
        assert!(temp_dir.path().join(filename).exists());
    }

    #[tokio::test]
    async fn test_update_and_get_config() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) = send(
            app.clone(),
            "PUT",
            "/api/v1/backup/config",
            Some(r#"{"maxBackups": 5}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["config"]["maxBackups"], 5);

        let (_, body) = send(app, "GET", "/api/v1/backup/config", None).await;
        assert_eq!(body["data"]["maxBackups"], 5);
        assert_eq!(body["data"]["retentionDays"], 30);
        assert_eq!(body["data"]["backupPrefix"], "auto-backup");
    }

    #[tokio::test]
    async fn test_update_config_rejects_zero() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) = send(
            app,
            "PUT",
            "/api/v1/backup/config",
            Some(r#"{"retentionDays": 0}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "retentionDays must be greater than zero");
    }

    #[tokio::test]
    async fn test_update_config_rejects_unrepresentable_values() {
        let app = app_with(sample_store(), MockDatabaseOps::new());

        let (status, body) = send(
            app.clone(),
            "PUT",
            "/api/v1/backup/config",
            Some(r#"{"maxBackups": -1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let (status, body) = send(
            app.clone(),
            "PUT",
            "/api/v1/backup/config",
            Some(r#"{"retentionDays": 1000000000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "retentionDays must be at most 36500");

        let (_, body) = send(app, "GET", "/api/v1/backup/config", None).await;
        assert_eq!(body["data"]["maxBackups"], 30);
        assert_eq!(body["data"]["retentionDays"], 30);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let store = Arc::new(MemoryStore::with_artifacts(vec![
            artifact("auto-backup-new.sql", Duration::days(1)),
            artifact("auto-backup-old.sql", Duration::days(45)),
        ]));
        let app = app_with(store.clone(), MockDatabaseOps::new());

        let (_, body) = send(app.clone(), "GET", "/api/v1/backup/stats", None).await;
        assert_eq!(body["data"]["totalBackups"], 2);
        assert_eq!(body["data"]["totalSizeFormatted"], "2 KB");

        let (status, body) = send(app, "POST", "/api/v1/backup/cleanup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["deleted"][0], "auto-backup-old.sql");
        assert_eq!(store.names(), vec!["auto-backup-new.sql"]);
    }
}

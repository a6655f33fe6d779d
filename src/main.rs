use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod database;

use config::{PolicyStore, RetentionPolicy, ServiceConfig};
use database::backup::{BackupManager, BackupOptions};
use database::ops::PostgresOps;
use database::scheduler::BackupScheduler;
use database::storage::BackupStore;
use database::storage::local_storage::LocalBackupStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service_config = ServiceConfig::from_env();
    let policy = Arc::new(PolicyStore::new(RetentionPolicy::from_env()));

    // Backup directory is created up front so listing works before the first backup
    let storage = Arc::new(LocalBackupStore::new(&service_config));
    storage.ensure_dir().await?;
    info!("Backups stored in {}", service_config.backup_dir.display());

    let manager = Arc::new(BackupManager::new(
        storage,
        Arc::new(PostgresOps::new(service_config.database.clone())),
        policy,
        BackupOptions {
            startup_grace: service_config.startup_grace,
        },
    ));

    let mut scheduler = BackupScheduler::new(manager.clone());
    scheduler.start()?;

    let app = api::router(Arc::new(api::AppState { manager }));

    let addr = format!("0.0.0.0:{}", service_config.port);
    info!("Server starting on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    scheduler.stop().await;
    Ok(())
}

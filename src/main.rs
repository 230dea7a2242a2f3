use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use drivetree::{Config, Database, Drive, DriveSettings, LocalBlobStore};

#[tokio::main]
async fn main() {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = drivetree::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        drivetree::logging::init_console_only(&config.logging.level);
    }

    info!("drivetree - hierarchical drive store");

    if let Err(e) = run(config).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> drivetree::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let blobs = LocalBlobStore::new(&config.storage.path)?;
    info!("Blob store at {:?}", blobs.base_path());

    let settings = DriveSettings::from_config(&config)?;
    let drive = Drive::new(db.clone(), Arc::new(blobs), settings);

    let mut reconcile = tokio::time::interval(Duration::from_secs(
        config.maintenance.reconcile_interval_secs,
    ));
    let mut blob_retry = tokio::time::interval(Duration::from_secs(
        config.maintenance.blob_retry_interval_secs,
    ));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Maintenance loop started");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = reconcile.tick() => {
                if let Err(e) = drive.quota().reconcile_all().await {
                    warn!("Quota reconciliation failed: {}", e);
                }
            }
            _ = blob_retry.tick() => {
                if let Err(e) = drive.janitor().retry_pending().await {
                    warn!("Blob retry pass failed: {}", e);
                }
            }
        }
    }

    db.close().await;
    info!("Stopped");
    Ok(())
}

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod detector;
mod driver;

use config::Config;
use dbus_interface::{RollcallService, DBUS_NAME, DBUS_PATH};
use detector::DetectionClient;
use driver::{spawn_driver, DriverConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let cfg = Config::load()?;
    let store = rollcall_store::SqliteStore::open(&cfg.db_path.to_string_lossy()).await?;

    let conn = zbus::Connection::session().await?;
    let detector = DetectionClient::connect(&conn).await?;

    let engine = rollcall_core::Engine::new(cfg.engine.clone(), cfg.fallback_cutoffs.clone());
    let handle = spawn_driver(
        engine,
        store,
        detector,
        DriverConfig {
            detection_interval_ms: cfg.detection_interval_ms,
            detector_timeout_ms: cfg.detector_timeout_ms,
        },
        conn.clone(),
    );

    conn.object_server()
        .at(DBUS_PATH, RollcallService::new(handle.clone()))
        .await?;
    conn.request_name(DBUS_NAME).await?;

    if let Some(shift) = &cfg.autostart_shift {
        handle.start(shift).await?;
        tracing::info!(shift = %shift, "scanning autostarted");
    }

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

//! evcmgrd - EVC Provisioning Manager Daemon
//!
//! Entry point for the evcmgrd daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use eline_evcmgrd::{
    EvcMgr, HttpFlowManager, HttpPathfinder, JsonFileStore, Settings, Topology,
};

/// Path of the daemon settings file.
const SETTINGS_PATH: &str = "evcmgrd.json";

/// Initializes tracing/logging subsystem
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("--- Starting evcmgrd ---");

    let settings = Settings::load(SETTINGS_PATH).context("failed to load settings")?;

    let topology = Arc::new(Topology::with_pool_override(
        settings.vlan_pool_override.clone(),
    ));
    let pathfinder = Arc::new(HttpPathfinder::new(settings.pathfinder_url.clone()));
    let flows = Arc::new(HttpFlowManager::new(settings.flow_manager_url.clone()));
    let store = Arc::new(
        JsonFileStore::open(&settings.store_path).context("failed to open circuit store")?,
    );

    let mut mgr = EvcMgr::new(topology, pathfinder, flows, store);
    match mgr.load_stored_circuits() {
        Ok(count) => info!("Loaded {} stored circuits", count),
        Err(e) => error!("Failed to load stored circuits: {}", e),
    }

    let period = Duration::from_secs(settings.dispatch_period_secs.max(1));
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                mgr.run_pending(Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down evcmgrd");
                break;
            }
        }
    }

    Ok(())
}

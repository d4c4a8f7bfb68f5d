//! console_api - HTTP JSON service for the management console
//!
//! This daemon:
//! 1. Loads the console configuration (`CONSOLE_CONFIG` plus env overrides)
//! 2. Seeds the grant store from the policy file, if one is configured
//! 3. Serves page render plans and form submissions until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use console_gate::{
    api::{ApiConfig, ApiServer},
    config::ConsoleConfig,
    PolicyFile, RoleGrantOracle, SqlitePermissionStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ConsoleConfig::load()?;
    let store = SqlitePermissionStore::open(&config.db_path)?;
    if let Some(path) = &config.policy_path {
        let applied = PolicyFile::read(path)?.apply_to(&store)?;
        log::info!("applied {} grants from {}", applied, path.display());
    }
    if config.sessions.is_empty() {
        log::warn!("no sessions configured; every authenticated route will answer 401");
    }

    let api_handle =
        ApiServer::new(ApiConfig::from(&config), Arc::new(RoleGrantOracle::new(store))).spawn()?;
    log::info!(
        "console_api running on {}. serving {}",
        api_handle.addr,
        config.db_path
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("console_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}

//! backlightd - keyboard backlight daemon
//!
//! Switches the keyboard backlight off while the user is idle, restores it on
//! activity and otherwise follows the ambient light level.

mod activity;
mod backlight;
mod config;
mod error;
mod hub;
mod light;
mod loader;
mod plugin;
#[cfg(test)]
mod testing;
mod types;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use crate::config::Config;
use crate::hub::Hub;

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    init_tracing(&config.logging.level)?;

    info!("Starting backlightd v{}", VERSION);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    runtime.block_on(run(config))?;

    info!("backlightd shutdown complete");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let hub = Arc::new(Hub::new(&config).context("Failed to load plugins")?);

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let signals = Arc::clone(&hub);
    tokio::spawn(async move {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => info!("Interrupt received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
        signals.stop();
    });

    hub.start().await.context("Hub stopped with an error")?;
    Ok(())
}

/// Initialize tracing subscriber with the given log level.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

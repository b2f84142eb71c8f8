//! STRATA Provisioner Entry Point
//!
//! Keeps time-sharded tables provisioned until Ctrl-C.
//!
//! Usage: `strata-provisioner <tables.toml>` (or `STRATA_TABLES_FILE`).

use std::path::PathBuf;
use strata_core::{StrataError, StrataResult};
use strata_runtime::{init_tracing, provisioner, RuntimeConfig, TablesFile};

#[tokio::main]
async fn main() -> StrataResult<()> {
    let config = RuntimeConfig::from_env();
    init_tracing(&config.telemetry)?;

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STRATA_TABLES_FILE").ok())
        .map(PathBuf::from)
        .ok_or_else(|| StrataError::missing("tables_file"))?;

    let file = TablesFile::load(&path).await?;
    tracing::info!(path = %path.display(), tables = file.tables.len(), "Loaded table descriptors");

    let manager = provisioner::connect(&config, file.tables).await?;
    tracing::info!(
        tick_interval_secs = config.sharding.tick_interval.as_secs(),
        "Starting STRATA provisioner"
    );

    let snapshot = provisioner::run_until(manager, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    })
    .await;

    tracing::info!(
        ticks = snapshot.ticks,
        tables_created = snapshot.tables_created,
        errors = snapshot.errors,
        "STRATA provisioner stopped"
    );
    Ok(())
}

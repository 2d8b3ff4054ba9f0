//! Run one sync cycle for every home on this device.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::{
    CycleReport, FixedDeviceId, HttpTransport, LoopbackRemote, RemoteSyncTransport,
    SyncOrchestrator,
};
use tracing::info;

use crate::config::{load_sync_config, open_store, DeviceConfig};

/// Where the cycle sends its batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The HTTP endpoint from the sync configuration
    Http,
    /// An in-process server whose state lives in this file
    Loopback(PathBuf),
}

/// Run the sync command.
pub async fn run(
    data_dir: &Path,
    target: Target,
    config_path: Option<&Path>,
) -> Result<CycleReport> {
    let device = DeviceConfig::load(data_dir).await?;
    let config = load_sync_config(data_dir, config_path)?;
    let registry = config.registry().context("Invalid entity type list")?;
    let store = open_store(data_dir);

    let loopback = match &target {
        Target::Loopback(path) => Some(
            LoopbackRemote::load(path)
                .await
                .context("Failed to load loopback state")?,
        ),
        Target::Http => None,
    };
    let transport: Arc<dyn RemoteSyncTransport> = match &loopback {
        Some(remote) => Arc::new(remote.clone()),
        None => {
            let http = HttpTransport::new(&config.http)?;
            info!(url = %http.url(), "Syncing over HTTP");
            Arc::new(http)
        }
    };

    let orchestrator = SyncOrchestrator::new(
        store,
        transport,
        Arc::new(FixedDeviceId::new(device.device_id.clone())),
        registry,
    );
    let report = orchestrator.run_cycle().await;

    if let (Some(remote), Target::Loopback(path)) = (&loopback, &target) {
        remote
            .save(path)
            .await
            .context("Failed to save loopback state")?;
    }

    print_report(&report);
    if !report.is_success() {
        anyhow::bail!("{} of {} collections failed to sync", report.failed(), report.attempted);
    }
    Ok(report)
}

fn print_report(report: &CycleReport) {
    println!("Sync complete");
    println!();
    println!("  Homes:       {}", report.homes);
    println!("  Collections: {} synced, {} failed", report.succeeded, report.failed());
    println!("  Changed:     {}", report.changed);
    for failure in &report.failures {
        let retry = if failure.retryable { "will retry" } else { "needs attention" };
        println!(
            "  ! {} {}: {} ({retry})",
            failure.home_id, failure.entity_type, failure.message
        );
    }
}

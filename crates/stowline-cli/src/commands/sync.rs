use std::time::Duration;

use serde::Serialize;
use stowline_core::sync::DrainReport;
use tokio::sync::watch;
use stowline_core::{NetworkMonitor, NetworkStatus, RestBackend};

use crate::commands::common::{short_id, AppContext, CliEngine};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct DrainSummary {
    pub offline: bool,
    pub applied: usize,
    pub failed: Vec<FailedItem>,
    pub blocked: Vec<String>,
    pub coalesced: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedItem {
    pub operation_id: String,
    pub account_id: String,
    pub kind: String,
    pub error: String,
    pub retry_count: u32,
}

pub fn drain_summary(report: &DrainReport) -> DrainSummary {
    DrainSummary {
        offline: report.offline,
        applied: report.applied.len(),
        failed: report
            .failed
            .iter()
            .map(|failure| FailedItem {
                operation_id: failure.operation_id.to_string(),
                account_id: failure.account_id.clone(),
                kind: failure.kind.as_str().to_string(),
                error: failure.error.clone(),
                retry_count: failure.retry_count,
            })
            .collect(),
        blocked: report.blocked.iter().map(ToString::to_string).collect(),
        coalesced: report.coalesced.clone(),
    }
}

pub fn format_drain_lines(report: &DrainReport) -> Vec<String> {
    if report.offline {
        return vec!["Offline; nothing attempted.".to_string()];
    }

    let mut lines = vec![format!("Applied {} operation(s)", report.applied.len())];
    for failure in &report.failed {
        lines.push(format!(
            "Failed  {}  {}  {} (retries={}): {}",
            short_id(&failure.operation_id.to_string()),
            failure.account_id,
            failure.kind.as_str(),
            failure.retry_count,
            failure.error
        ));
    }
    for id in &report.blocked {
        lines.push(format!(
            "Stalled {}  run `stowline queue retry` or `stowline queue discard`",
            short_id(&id.to_string())
        ));
    }
    for account in &report.coalesced {
        lines.push(format!("Skipped {account}: drain already in progress"));
    }
    lines
}

/// Ping the backend and record the result on the network monitor.
async fn refresh_connectivity(backend: &RestBackend, network: &NetworkMonitor) -> bool {
    let online = match backend.ping().await {
        Ok(()) => true,
        Err(error) => {
            tracing::debug!(%error, "Backend ping failed");
            false
        }
    };
    network.set_online(online);
    online
}

pub async fn run_sync(
    app: &AppContext,
    account: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let network = NetworkMonitor::new(true);
    let backend = app.backend()?;
    refresh_connectivity(&backend, &network).await;
    let (_store, engine) = app.engine(network).await?;

    let report = engine.drain(account).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&drain_summary(&report))?);
        return Ok(());
    }
    for line in format_drain_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

/// Drain on every tick while online and immediately on reconnect, until Ctrl-C.
pub async fn run_watch(
    app: &AppContext,
    interval_secs: u64,
    account: Option<&str>,
) -> Result<(), CliError> {
    if interval_secs == 0 {
        return Err(CliError::Config(
            "interval_secs must be greater than zero".to_string(),
        ));
    }

    let network = NetworkMonitor::new(false);
    let mut online_rx = network.subscribe();
    let backend = app.backend()?;
    let (_store, engine) = app.engine(network.clone()).await?;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(interval_secs, "Watching outbox");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Stopping watch");
                return Ok(());
            }
            () = next_reconnect(&mut online_rx) => {
                tracing::info!("Back online, draining outbox");
                drain_and_print(&engine, account).await;
            }
            _ = ticker.tick() => {
                let was_online = network.is_online();
                // A reconnect is drained by the subscription branch.
                if refresh_connectivity(&backend, &network).await && was_online {
                    drain_and_print(&engine, account).await;
                }
            }
        }
    }
}

/// Resolve on the next offline to online transition published by the monitor.
pub(crate) async fn next_reconnect(rx: &mut watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow_and_update() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

async fn drain_and_print(engine: &CliEngine, account: Option<&str>) {
    match engine.drain(account).await {
        Ok(report) if report.applied.is_empty() && report.is_clean() => {}
        Ok(report) => {
            for line in format_drain_lines(&report) {
                println!("{line}");
            }
        }
        Err(error) => tracing::error!(%error, "Drain failed"),
    }
}

use std::env;

use serde::Serialize;
use stowline_core::ScopeContext;

use crate::commands::common::{format_bytes, AppContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub profile: String,
    pub backend_configured: bool,
    pub pending_operations: usize,
    pub stalled_operations: usize,
    pub unresolved_conflicts: usize,
    pub media_used_bytes: u64,
    pub media_quota_bytes: u64,
    pub context: ScopeContext,
}

pub async fn collect_status(app: &AppContext) -> Result<StatusReport, CliError> {
    let store = app.open_store().await?;
    let max_retries = app.engine_config.max_permanent_retries;

    let operations = store.list_operations(None).await?;
    let stalled = operations
        .iter()
        .filter(|operation| operation.is_stalled(max_retries))
        .count();
    let conflicts = store.list_conflicts(None, true).await?;
    let usage = store.media_usage(None).await?;
    let context = store.load_context().await?;

    Ok(StatusReport {
        db_path: app.db_path.display().to_string(),
        profile: app.profile_name.clone(),
        backend_configured: app
            .profile
            .backend_config(|name| env::var(name).ok())
            .is_configured(),
        pending_operations: operations.len(),
        stalled_operations: stalled,
        unresolved_conflicts: conflicts.len(),
        media_used_bytes: usage.used_bytes,
        media_quota_bytes: usage.quota_bytes,
        context,
    })
}

pub fn format_status_lines(status: &StatusReport) -> Vec<String> {
    let scope = status.context.scope().map_or_else(
        || "(none)".to_string(),
        |scope| match scope.project_id {
            Some(project) => format!("{} / {project}", scope.account_id),
            None => scope.account_id,
        },
    );
    vec![
        format!("Database:   {}", status.db_path),
        format!(
            "Profile:    {}{}",
            status.profile,
            if status.backend_configured { "" } else { " (backend not configured)" }
        ),
        format!("Scope:      {scope}"),
        format!(
            "Outbox:     {} pending, {} stalled",
            status.pending_operations, status.stalled_operations
        ),
        format!("Conflicts:  {} unresolved", status.unresolved_conflicts),
        format!(
            "Media:      {} of {}",
            format_bytes(status.media_used_bytes),
            format_bytes(status.media_quota_bytes)
        ),
    ]
}

pub async fn run_status(app: &AppContext, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(app).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

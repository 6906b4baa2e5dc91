use stowline_core::models::{MergeInstructions, ResolutionChoice, Side};
use stowline_core::NetworkMonitor;

use crate::cli::{ChoiceArg, ConflictCommands, SideArg};
use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, resolve_conflict, resolve_scope, short_id,
    AppContext, ConflictListItem,
};
use crate::error::CliError;

impl From<SideArg> for Side {
    fn from(value: SideArg) -> Self {
        match value {
            SideArg::Local => Self::Local,
            SideArg::Server => Self::Server,
        }
    }
}

/// `None` defers to the automatic policy.
pub fn resolution_choice(
    choice: ChoiceArg,
    prefer: SideArg,
    take_other: Vec<String>,
) -> Option<ResolutionChoice> {
    match choice {
        ChoiceArg::Auto => None,
        ChoiceArg::Local => Some(ResolutionChoice::Local),
        ChoiceArg::Server => Some(ResolutionChoice::Server),
        ChoiceArg::Merge => Some(ResolutionChoice::Merge(MergeInstructions {
            prefer: prefer.into(),
            take_other: take_other
                .into_iter()
                .map(|field| field.trim().to_string())
                .filter(|field| !field.is_empty())
                .collect(),
        })),
    }
}

pub async fn run_detect(
    app: &AppContext,
    account: Option<String>,
    project: Option<String>,
    as_json: bool,
) -> Result<(), CliError> {
    let (store, engine) = app.engine(NetworkMonitor::new(true)).await?;
    let scope = resolve_scope(&store, account, project).await?;
    let conflicts = engine.detect(&scope).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts for account {}.", scope.account_id);
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts(command: ConflictCommands, app: &AppContext) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { account, all, json } => {
            run_conflicts_list(app, account.as_deref(), all, json).await
        }
        ConflictCommands::Resolve {
            id,
            choice,
            prefer,
            take_other,
        } => run_conflicts_resolve(app, &id, resolution_choice(choice, prefer, take_other)).await,
        ConflictCommands::ResolveAuto { account } => {
            run_conflicts_resolve_auto(app, account.as_deref()).await
        }
        ConflictCommands::Purge { account } => run_conflicts_purge(app, account.as_deref()).await,
    }
}

async fn run_conflicts_list(
    app: &AppContext,
    account: Option<&str>,
    include_resolved: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let store = app.open_store().await?;
    let conflicts = store.list_conflicts(account, !include_resolved).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

async fn run_conflicts_resolve(
    app: &AppContext,
    id: &str,
    choice: Option<ResolutionChoice>,
) -> Result<(), CliError> {
    let (store, engine) = app.engine(NetworkMonitor::new(true)).await?;
    let conflict = resolve_conflict(&store, id).await?;
    let record = engine.resolve(&conflict.id, choice).await?;
    println!(
        "Resolved {} for {} {} at v{}",
        short_id(&conflict.id.to_string()),
        record.kind(),
        record.business_id(),
        record.version
    );
    Ok(())
}

async fn run_conflicts_resolve_auto(
    app: &AppContext,
    account: Option<&str>,
) -> Result<(), CliError> {
    let (_store, engine) = app.engine(NetworkMonitor::new(true)).await?;
    let report = engine.resolve_all_automatic(account).await?;

    println!("Resolved {} conflict(s)", report.resolved.len());
    if !report.manual.is_empty() {
        println!(
            "{} conflict(s) need a choice: {}",
            report.manual.len(),
            report
                .manual
                .iter()
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    for (id, error) in &report.failed {
        println!("Failed  {}: {error}", short_id(&id.to_string()));
    }
    Ok(())
}

async fn run_conflicts_purge(app: &AppContext, account: Option<&str>) -> Result<(), CliError> {
    let store = app.open_store().await?;
    let removed = store.purge_resolved_conflicts(account).await?;
    println!("Purged {removed} resolved conflict(s)");
    Ok(())
}

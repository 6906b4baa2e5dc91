use stowline_core::LocalStore;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_operation_lines, operation_to_list_item, resolve_operation, short_id, AppContext,
    OperationListItem,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, app: &AppContext) -> Result<(), CliError> {
    let store = app.open_store().await?;
    let max_retries = app.engine_config.max_permanent_retries;

    match command {
        QueueCommands::List {
            account,
            stalled,
            json,
        } => run_queue_list(&store, account.as_deref(), stalled, json, max_retries).await,
        QueueCommands::Retry { id } => run_queue_retry(&store, &id).await,
        QueueCommands::Discard { id } => run_queue_discard(&store, &id).await,
    }
}

pub async fn run_queue_list(
    store: &LocalStore,
    account: Option<&str>,
    stalled_only: bool,
    as_json: bool,
    max_retries: u32,
) -> Result<(), CliError> {
    let mut operations = store.list_operations(account).await?;
    if stalled_only {
        operations.retain(|operation| operation.is_stalled(max_retries));
    }

    if as_json {
        let json_items = operations
            .iter()
            .map(|operation| operation_to_list_item(operation, max_retries))
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    for line in format_operation_lines(&operations, max_retries, store.now()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_retry(store: &LocalStore, id: &str) -> Result<(), CliError> {
    let operation = resolve_operation(store, id).await?;
    store.reset_operation_retries(&operation.id).await?;
    tracing::info!(operation_id = %operation.id, "Operation reset for retry");
    println!("{}", operation.id);
    Ok(())
}

pub async fn run_queue_discard(store: &LocalStore, id: &str) -> Result<(), CliError> {
    let operation = resolve_operation(store, id).await?;
    store.delete_operation(&operation.id).await?;
    tracing::warn!(
        operation_id = %operation.id,
        op_type = %operation.op_type,
        "Discarded operation"
    );
    println!(
        "Discarded {} {} for item {}",
        short_id(&operation.id.to_string()),
        operation.op_type,
        operation.business_id()
    );
    Ok(())
}

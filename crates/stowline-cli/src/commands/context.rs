use stowline_core::util::normalize_text_option;
use stowline_core::ScopeContext;

use crate::cli::ContextCommands;
use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_context(command: ContextCommands, app: &AppContext) -> Result<(), CliError> {
    let store = app.open_store().await?;
    match command {
        ContextCommands::Show { json } => {
            let context = store.load_context().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                for line in format_context_lines(&context) {
                    println!("{line}");
                }
            }
        }
        ContextCommands::Set {
            account,
            user,
            project,
        } => {
            let current = store.load_context().await?;
            let context = merge_context(current, account, user, project);
            store.save_context(&context).await?;
            tracing::info!(account_id = ?context.account_id, "Saved context");
            for line in format_context_lines(&context) {
                println!("{line}");
            }
        }
        ContextCommands::Clear => {
            store.save_context(&ScopeContext::default()).await?;
            println!("Context cleared");
        }
    }
    Ok(())
}

/// Flags replace stored values; omitted flags keep them. Switching account drops the project.
pub fn merge_context(
    current: ScopeContext,
    account: Option<String>,
    user: Option<String>,
    project: Option<String>,
) -> ScopeContext {
    let account = normalize_text_option(account);
    let account_changed = account.is_some() && account != current.account_id;
    let project = normalize_text_option(project).or(if account_changed {
        None
    } else {
        current.project_id
    });

    ScopeContext {
        account_id: account.or(current.account_id),
        user_id: normalize_text_option(user).or(current.user_id),
        project_id: project,
    }
}

pub fn format_context_lines(context: &ScopeContext) -> Vec<String> {
    let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "(none)".to_string());
    vec![
        format!("Account: {}", show(&context.account_id)),
        format!("User:    {}", show(&context.user_id)),
        format!("Project: {}", show(&context.project_id)),
    ]
}

use serde::Serialize;
use stowline_core::models::MediaUsage;

use crate::cli::MediaCommands;
use crate::commands::common::{format_bytes, AppContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct MediaUsageItem {
    pub account_id: Option<String>,
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub remaining_bytes: u64,
}

pub fn media_usage_item(account: Option<&str>, usage: &MediaUsage) -> MediaUsageItem {
    MediaUsageItem {
        account_id: account.map(ToString::to_string),
        used_bytes: usage.used_bytes,
        quota_bytes: usage.quota_bytes,
        remaining_bytes: usage.remaining_bytes(),
    }
}

pub fn format_media_usage(usage: &MediaUsage) -> String {
    format!(
        "{} of {} used ({} free)",
        format_bytes(usage.used_bytes),
        format_bytes(usage.quota_bytes),
        format_bytes(usage.remaining_bytes())
    )
}

pub async fn run_media(command: MediaCommands, app: &AppContext) -> Result<(), CliError> {
    match command {
        MediaCommands::Usage { account, json } => {
            let store = app.open_store().await?;
            let usage = store.media_usage(account.as_deref()).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&media_usage_item(account.as_deref(), &usage))?
                );
            } else {
                println!("{}", format_media_usage(&usage));
            }
            Ok(())
        }
    }
}

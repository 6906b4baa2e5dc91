use crate::cli::CacheCommands;
use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_cache(command: CacheCommands, app: &AppContext) -> Result<(), CliError> {
    match command {
        CacheCommands::Purge => {
            let store = app.open_store().await?;
            let removed = store.purge_expired_cache().await?;
            let noun = if removed == 1 { "entry" } else { "entries" };
            println!("Purged {removed} expired cache {noun}");
            Ok(())
        }
    }
}

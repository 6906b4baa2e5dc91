use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stowline_core::models::{Conflict, Operation};
use stowline_core::{EngineConfig, LocalStore, NetworkMonitor, RestBackend, Scope, SyncEngine};

use crate::config_profiles::{default_engine_config_path, CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Engine wired to the configured REST backend
pub type CliEngine = SyncEngine<RestBackend, NetworkMonitor>;

const SHORT_ID_LEN: usize = 13;

/// Paths and settings resolved from flags, environment, and profile file
#[derive(Debug, Clone)]
pub struct AppContext {
    pub db_path: PathBuf,
    pub engine_config: EngineConfig,
    pub profile_name: String,
    pub profile: CliProfile,
}

impl AppContext {
    pub fn resolve(
        db_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
        profile: Option<&str>,
    ) -> Result<Self, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(profile);
        let profile = profiles.profile(&profile_name).cloned().unwrap_or_default();

        let engine_config = match config_path {
            Some(path) if !path.exists() => {
                return Err(CliError::Config(format!(
                    "engine config not found at {}",
                    path.display()
                )));
            }
            Some(path) => EngineConfig::load(Some(&path))?,
            None => EngineConfig::load(Some(&default_engine_config_path()))?,
        };

        Ok(Self {
            db_path: resolve_db_path(db_path),
            engine_config,
            profile_name,
            profile,
        })
    }

    pub async fn open_store(&self) -> Result<LocalStore, CliError> {
        Ok(LocalStore::open(&self.db_path, &self.engine_config).await?)
    }

    pub fn backend(&self) -> Result<RestBackend, CliError> {
        let config = self.profile.backend_config(|name| env::var(name).ok());
        if !config.is_configured() {
            return Err(CliError::BackendNotConfigured);
        }
        Ok(RestBackend::new(&config)?)
    }

    pub async fn engine(
        &self,
        network: NetworkMonitor,
    ) -> Result<(LocalStore, CliEngine), CliError> {
        let backend = self.backend()?;
        let store = self.open_store().await?;
        let engine = SyncEngine::new(store.clone(), backend, network, &self.engine_config);
        Ok((store, engine))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STOWLINE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stowline")
        .join("stowline.db")
}

/// Explicit flags first, then the saved context.
pub async fn resolve_scope(
    store: &LocalStore,
    account: Option<String>,
    project: Option<String>,
) -> Result<Scope, CliError> {
    let account = stowline_core::util::normalize_text_option(account);
    let project = stowline_core::util::normalize_text_option(project);
    if let Some(account_id) = account {
        return Ok(Scope {
            account_id,
            project_id: project,
        });
    }

    let saved = store.load_context().await?;
    let mut scope = saved.scope().ok_or(CliError::MissingScope)?;
    if project.is_some() {
        scope.project_id = project;
    }
    Ok(scope)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyIdentifier);
    }
    Ok(id.to_string())
}

pub async fn resolve_operation(store: &LocalStore, query: &str) -> Result<Operation, CliError> {
    let query = normalize_identifier(query)?;
    let operations = store.list_operations(None).await?;
    resolve_by_prefix(operations, |op| op.id.to_string(), &query, "operation")
}

pub async fn resolve_conflict(store: &LocalStore, query: &str) -> Result<Conflict, CliError> {
    let query = normalize_identifier(query)?;
    let conflicts = store.list_conflicts(None, false).await?;
    resolve_by_prefix(conflicts, |conflict| conflict.id.to_string(), &query, "conflict")
}

/// Exact id match, else a unique prefix match.
pub fn resolve_by_prefix<T>(
    candidates: Vec<T>,
    id_of: impl Fn(&T) -> String,
    query: &str,
    kind: &'static str,
) -> Result<T, CliError> {
    let mut matches: Vec<(String, T)> = candidates
        .into_iter()
        .map(|candidate| (id_of(&candidate), candidate))
        .filter(|(id, _)| id.starts_with(query))
        .collect();

    if let Some(position) = matches.iter().position(|(id, _)| id == query) {
        return Ok(matches.swap_remove(position).1);
    }

    match matches.len() {
        0 => Err(CliError::NotFound {
            kind,
            query: query.to_string(),
        }),
        1 => Ok(matches.remove(0).1),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|(id, _)| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - then).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: String,
    pub op_type: String,
    pub account_id: String,
    pub item_id: String,
    pub version: i64,
    pub timestamp: String,
    pub retry_count: u32,
    pub permanent_failures: u32,
    pub last_error: Option<String>,
    pub failure_kind: Option<String>,
    pub stalled: bool,
}

pub fn operation_to_list_item(
    operation: &Operation,
    max_permanent_retries: u32,
) -> OperationListItem {
    OperationListItem {
        id: operation.id.to_string(),
        op_type: operation.op_type.to_string(),
        account_id: operation.account_id.clone(),
        item_id: operation.business_id().to_string(),
        version: operation.version,
        timestamp: operation.timestamp.to_rfc3339(),
        retry_count: operation.retry_count,
        permanent_failures: operation.permanent_failures,
        last_error: operation.last_error.clone(),
        failure_kind: operation.failure_kind.map(|kind| kind.as_str().to_string()),
        stalled: operation.is_stalled(max_permanent_retries),
    }
}

pub fn format_operation_lines(
    operations: &[Operation],
    max_permanent_retries: u32,
    now: DateTime<Utc>,
) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let id = short_id(&operation.id.to_string());
            let item = short_id(operation.business_id());
            let age = format_relative_time(operation.timestamp, now);
            let mut line = format!(
                "{id:<13}  {:<18}  {:<12}  item={item:<13}  v{:<3}  {age}",
                operation.op_type.as_str(),
                operation.account_id,
                operation.version
            );
            if operation.retry_count > 0 {
                line.push_str(&format!("  retries={}", operation.retry_count));
            }
            if operation.permanent_failures > 0 {
                line.push_str(&format!("  rejected={}", operation.permanent_failures));
            }
            if operation.is_stalled(max_permanent_retries) {
                line.push_str("  STALLED");
            }
            if let Some(error) = &operation.last_error {
                line.push_str(&format!("  last_error=\"{error}\""));
            }
            line
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub item_id: String,
    pub entity_kind: String,
    pub account_id: String,
    pub project_id: Option<String>,
    pub conflict_type: String,
    pub field: Option<String>,
    pub local_version: i64,
    pub server_version: i64,
    pub resolved: bool,
    pub strategy: Option<String>,
    pub created_at: String,
}

pub fn conflict_to_list_item(conflict: &Conflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.to_string(),
        item_id: conflict.item_id.clone(),
        entity_kind: conflict.entity_kind.to_string(),
        account_id: conflict.account_id.clone(),
        project_id: conflict.project_id.clone(),
        conflict_type: conflict.conflict_type.as_str().to_string(),
        field: conflict.field.clone(),
        local_version: conflict.local.version,
        server_version: conflict.server.version,
        resolved: conflict.resolved,
        strategy: conflict
            .resolution
            .as_ref()
            .map(|resolution| resolution.strategy.to_string()),
        created_at: conflict.created_at.to_rfc3339(),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let status = conflict
                .resolution
                .as_ref()
                .map_or_else(|| "open".to_string(), |resolution| resolution.strategy.to_string());
            format!(
                "{:<13}  {}  {:<11}  {:<9}  item={:<13}  field={:<14}  \
                 local=v{} server=v{}  {status}",
                short_id(&conflict.id.to_string()),
                format_timestamp(&conflict.created_at),
                conflict.entity_kind.as_str(),
                conflict.conflict_type.as_str(),
                short_id(&conflict.item_id),
                conflict.field.as_deref().unwrap_or("-"),
                conflict.local.version,
                conflict.server.version,
            )
        })
        .collect()
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

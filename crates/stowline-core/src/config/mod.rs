//! Engine configuration.
//!
//! Values resolve in order: built-in defaults, an optional JSON file, then
//! `STOWLINE_*` environment variables.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// 50 MiB
pub const DEFAULT_MEDIA_QUOTA_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PERMANENT_RETRIES: u32 = 5;
pub const DEFAULT_RECENT_SYNC_WINDOW_SECS: u64 = 5;
pub const DEFAULT_RECENT_WRITE_WINDOW_SECS: u64 = 2;
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: u64 = 10;
pub const DEFAULT_TIMESTAMP_MATERIALITY_SECS: u64 = 300;

const ENV_PREFIX: &str = "STOWLINE_";

/// Tunables for the local store, outbox, and conflict pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on summed media blob sizes
    pub media_quota_bytes: u64,
    /// Permanent failures allowed before an operation stalls
    pub max_permanent_retries: u32,
    /// Entities synced more recently than this are skipped by detection
    pub recent_sync_window_secs: u64,
    /// Entities written locally more recently than this are skipped by detection
    pub recent_write_window_secs: u64,
    /// Remote timestamps must lead local ones by more than this to count
    pub clock_skew_tolerance_secs: u64,
    /// Timestamp lead above which the server wins automatically
    pub timestamp_materiality_secs: u64,
    /// TTL applied by read-through caching when the caller gives none
    pub default_cache_ttl_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            media_quota_bytes: DEFAULT_MEDIA_QUOTA_BYTES,
            max_permanent_retries: DEFAULT_MAX_PERMANENT_RETRIES,
            recent_sync_window_secs: DEFAULT_RECENT_SYNC_WINDOW_SECS,
            recent_write_window_secs: DEFAULT_RECENT_WRITE_WINDOW_SECS,
            clock_skew_tolerance_secs: DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
            timestamp_materiality_secs: DEFAULT_TIMESTAMP_MATERIALITY_SECS,
            default_cache_ttl_secs: None,
        }
    }
}

impl EngineConfig {
    /// Resolve config from an optional JSON file plus process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => parse_engine_config(&std::fs::read_to_string(path)?)?,
            Some(path) => {
                tracing::debug!("No engine config at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `STOWLINE_<FIELD>` variables supplied by `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| normalize_text_option(lookup(&format!("{ENV_PREFIX}{name}")));

        if let Some(value) = var("MEDIA_QUOTA_BYTES") {
            self.media_quota_bytes = parse_number("MEDIA_QUOTA_BYTES", &value)?;
        }
        if let Some(value) = var("MAX_PERMANENT_RETRIES") {
            self.max_permanent_retries = parse_number("MAX_PERMANENT_RETRIES", &value)?;
        }
        if let Some(value) = var("RECENT_SYNC_WINDOW_SECS") {
            self.recent_sync_window_secs = parse_number("RECENT_SYNC_WINDOW_SECS", &value)?;
        }
        if let Some(value) = var("RECENT_WRITE_WINDOW_SECS") {
            self.recent_write_window_secs = parse_number("RECENT_WRITE_WINDOW_SECS", &value)?;
        }
        if let Some(value) = var("CLOCK_SKEW_TOLERANCE_SECS") {
            self.clock_skew_tolerance_secs = parse_number("CLOCK_SKEW_TOLERANCE_SECS", &value)?;
        }
        if let Some(value) = var("TIMESTAMP_MATERIALITY_SECS") {
            self.timestamp_materiality_secs = parse_number("TIMESTAMP_MATERIALITY_SECS", &value)?;
        }
        if let Some(value) = var("DEFAULT_CACHE_TTL_SECS") {
            self.default_cache_ttl_secs = Some(parse_number("DEFAULT_CACHE_TTL_SECS", &value)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.media_quota_bytes == 0 {
            return Err(Error::Config(
                "media_quota_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn recent_sync_window(&self) -> Duration {
        seconds(self.recent_sync_window_secs)
    }

    pub fn recent_write_window(&self) -> Duration {
        seconds(self.recent_write_window_secs)
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        seconds(self.clock_skew_tolerance_secs)
    }

    pub fn timestamp_materiality(&self) -> Duration {
        seconds(self.timestamp_materiality_secs)
    }

    pub fn default_cache_ttl(&self) -> Option<Duration> {
        self.default_cache_ttl_secs.map(seconds)
    }
}

/// Parse an engine config from a raw JSON payload.
pub fn parse_engine_config(payload: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_json::from_str(payload)
        .map_err(|error| Error::Config(format!("invalid engine config JSON: {error}")))?;
    config.validate()?;
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        Error::Config(format!(
            "{ENV_PREFIX}{name} must be a non-negative integer, got '{raw}'"
        ))
    })
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

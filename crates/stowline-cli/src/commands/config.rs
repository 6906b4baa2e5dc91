use std::env;

use stowline_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::commands::common::AppContext;
use crate::config_profiles::{
    default_config_path, default_engine_config_path, normalize_text_option, CliProfile,
    CliProfilesConfig,
};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    app: &AppContext,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            base_url,
            api_key,
            access_token,
            timeout_secs,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileUpdate {
                base_url,
                api_key,
                access_token,
                timeout_secs,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(app),
    }
}

/// Values passed to `config init`; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub timeout_secs: Option<u64>,
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_update(profile, update, |name| env::var(name).ok());
    validate_profile(profile)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{}' initialized at {}", profile_name, path.display());

    let profile = config
        .profiles
        .get(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing_fields = missing_profile_fields(profile);
    if missing_fields.is_empty() {
        println!("Profile '{profile_name}' is ready. Run `stowline sync` to drain the outbox.");
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

/// Explicit flags win, then `STOWLINE_*` variables, then stored values.
pub fn apply_profile_update(
    profile: &mut CliProfile,
    update: ProfileUpdate,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = |name: &str| normalize_text_option(lookup(name));

    if let Some(value) =
        normalize_text_option(update.base_url).or_else(|| env("STOWLINE_BACKEND_URL"))
    {
        profile.base_url = Some(value.trim_end_matches('/').to_string());
    }
    if let Some(value) = normalize_text_option(update.api_key).or_else(|| env("STOWLINE_API_KEY")) {
        profile.api_key = Some(value);
    }
    if let Some(value) = normalize_text_option(update.access_token) {
        profile.access_token = Some(value);
    }
    if let Some(value) = update.timeout_secs {
        profile.timeout_secs = Some(value);
    }
}

pub fn missing_profile_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if normalize_text_option(profile.base_url.clone()).is_none() {
        missing.push("base_url");
    }
    if normalize_text_option(profile.api_key.clone()).is_none() {
        missing.push("api_key");
    }
    missing
}

fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(profile.base_url.clone()) {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "base_url must include http:// or https://".to_string(),
            ));
        }
    }
    if profile.timeout_secs == Some(0) {
        return Err(CliError::Config(
            "timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn run_config_show(app: &AppContext) -> Result<(), CliError> {
    let backend = app.profile.backend_config(|name| env::var(name).ok());
    println!("Profile:        {}", app.profile_name);
    println!("Profiles file:  {}", default_config_path().display());
    println!("Engine config:  {}", default_engine_config_path().display());
    println!("Database:       {}", app.db_path.display());
    println!(
        "Backend URL:    {}",
        backend.base_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "API key:        {}",
        if backend.api_key.is_some() { "set" } else { "(not set)" }
    );
    println!(
        "Access token:   {}",
        if backend.access_token.is_some() { "set" } else { "(not set)" }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&app.engine_config)?);
    Ok(())
}

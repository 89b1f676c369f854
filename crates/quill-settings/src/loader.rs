//! Settings loading and validation.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. Merge the optional JSON config file
//! 3. Merge `OCR_*` environment variables (highest priority)
//! 4. Normalise (trim strings, expand `~`, drop empty optionals)
//! 5. Validate ranges; any violation is an error, never a silent fallback

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::Settings;

/// Environment namespace for every setting.
pub const ENV_PREFIX: &str = "OCR_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Load settings from defaults, an optional JSON file, and the environment.
///
/// An explicitly passed `config_path` must exist. When no registry token is
/// configured, `HF_TOKEN` is used as a fallback.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    if let Some(path) = config_path {
        if !path.is_file() {
            return Err(SettingsError::MissingFile(path.to_path_buf()));
        }
        debug!(?path, "loading settings file");
        figment = figment.merge(Json::file(path));
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX));

    let mut settings = settings_from_figment(&figment)?;
    if settings.hf_token.is_none() {
        settings.hf_token = non_empty(std::env::var("HF_TOKEN").ok());
    }
    Ok(settings)
}

/// Extract, normalise, and validate settings from an arbitrary figment.
pub fn settings_from_figment(figment: &Figment) -> Result<Settings> {
    let mut settings: Settings = figment.extract().map_err(Box::new)?;
    normalize(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn normalize(settings: &mut Settings) {
    settings.model_name = settings.model_name.trim().to_string();
    settings.model_repo_id = settings.model_repo_id.trim().to_string();
    settings.model_store_dir = expand_home(&settings.model_store_dir);
    settings.model_filename = non_empty(settings.model_filename.take());
    settings.hf_token = non_empty(settings.hf_token.take());
    settings.backend_additional_args = non_empty(settings.backend_additional_args.take());
    settings.backend_base_url = settings
        .backend_base_url
        .trim()
        .trim_end_matches('/')
        .to_string();
    settings.log_level = settings.log_level.trim().to_ascii_lowercase();
}

/// Range checks for every value that can be out of bounds.
pub(crate) fn validate(settings: &Settings) -> Result<()> {
    if !LOG_LEVELS.contains(&settings.log_level.as_str()) {
        return Err(SettingsError::invalid(
            "log_level",
            format!("must be one of {}", LOG_LEVELS.join(", ")),
        ));
    }
    if settings.model_name.is_empty() {
        return Err(SettingsError::invalid("model_name", "must not be empty"));
    }
    if settings.model_repo_id.is_empty() {
        return Err(SettingsError::invalid("model_repo_id", "must not be empty"));
    }
    if settings.backend_base_url.is_empty() {
        return Err(SettingsError::invalid("backend_base_url", "must not be empty"));
    }
    if settings.api_port == 0 {
        return Err(SettingsError::invalid("api_port", "must be between 1 and 65535"));
    }
    if settings.backend_port == 0 {
        return Err(SettingsError::invalid("backend_port", "must be between 1 and 65535"));
    }
    for (field, secs) in [
        ("backend_timeout_secs", settings.backend_timeout_secs),
        ("backend_startup_timeout_secs", settings.backend_startup_timeout_secs),
        ("inference_timeout_secs", settings.inference_timeout_secs),
    ] {
        if secs == 0 {
            return Err(SettingsError::invalid(field, "must be greater than 0"));
        }
    }
    if settings.max_upload_megabytes == 0 {
        return Err(SettingsError::invalid("max_upload_megabytes", "must be greater than 0"));
    }
    if settings.checked_upload_bytes().is_none() {
        return Err(SettingsError::invalid(
            "max_upload_megabytes",
            "is too large to address in memory",
        ));
    }
    if settings.allowed_content_types.is_empty() {
        return Err(SettingsError::invalid(
            "allowed_content_types",
            "must list at least one content type",
        ));
    }
    if settings.top_k < 1 {
        return Err(SettingsError::invalid("top_k", "must be >= 1"));
    }
    if !(settings.top_p > 0.0 && settings.top_p <= 1.0) {
        return Err(SettingsError::invalid("top_p", "must be > 0 and <= 1"));
    }
    if !(settings.temperature >= 0.0 && settings.temperature.is_finite()) {
        return Err(SettingsError::invalid("temperature", "must be a finite value >= 0"));
    }
    if settings.max_tokens == 0 {
        return Err(SettingsError::invalid("max_tokens", "must be greater than 0"));
    }
    if settings.backend_tensor_parallel_size < 1 {
        return Err(SettingsError::invalid("backend_tensor_parallel_size", "must be >= 1"));
    }
    let utilization = settings.backend_gpu_memory_utilization;
    if !(utilization > 0.0 && utilization <= 1.0) {
        return Err(SettingsError::invalid(
            "backend_gpu_memory_utilization",
            "must be > 0 and <= 1",
        ));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}

//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An explicitly requested config file does not exist.
    #[error("settings file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// A layer could not be read or a value had the wrong type.
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A value parsed but is outside its allowed range.
    #[error("invalid settings value for `{field}`: {reason}")]
    InvalidValue {
        /// Settings key (without the env prefix).
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

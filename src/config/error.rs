//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read config file {path}: {message}")]
    FileRead { path: PathBuf, message: String },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

//! Configuration errors.
//!
//! Messages name the offending file, key or environment variable so a
//! failed start can be fixed without reading the source. Secret values are
//! never echoed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while layering or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Requested path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension or format name is neither `toml` nor `json`.
    #[error("unsupported configuration format '{format}', expected toml or json")]
    UnsupportedFormat {
        /// Extension or format name as given.
        format: String,
    },

    /// TOML syntax or type error.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or type error, including unknown keys after merging.
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    /// A `.env` file exists but does not parse.
    #[error("cannot load .env: {0}")]
    DotEnv(String),

    /// An `ACCESSMESH__*` variable has an unknown key or unparseable value.
    #[error("environment override {var}: {reason}")]
    EnvOverride {
        /// Variable name.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// A key is present but its value is unusable.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted key, e.g. `rate_limit.capacity`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A required key has no value.
    #[error("{field} is required")]
    MissingField {
        /// Dotted key.
        field: String,
    },
}

impl ConfigError {
    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Rejects the value of `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Reports a required `field` as absent.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub(crate) fn env_override(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// The dotted key this error is about, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { field, .. } | Self::MissingField { field } => Some(field),
            _ => None,
        }
    }
}

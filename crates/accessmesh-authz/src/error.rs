//! Error types for the authorization crate.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors raised outside the per-request decision path.
///
/// Per-request failures are [`accessmesh_core::CredentialError`] and
/// [`accessmesh_core::Decision`]; this type covers setup and the policy store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The policy store has not received a snapshot yet.
    #[error("policy store not loaded")]
    StoreNotLoaded,

    /// A snapshot exceeds the configured policy limit.
    #[error("policy snapshot has {count} policies, limit is {max}")]
    TooManyPolicies {
        /// Policies offered.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    /// Loading policies from a file failed.
    #[error("failed to load policies from {path}: {message}")]
    PolicyLoad {
        /// Path to the policy file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// The signing secret is unusable.
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),

    /// Token signing failed.
    #[error("failed to issue token: {0}")]
    Issue(String),

    /// The configured timezone is neither an IANA name nor a UTC offset.
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthzError {
    /// Create a policy load error.
    pub fn policy_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PolicyLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error means no snapshot is available.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreNotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_load_error() {
        let err = AuthzError::policy_load("/etc/accessmesh/policies.json", "file not found");
        assert!(err.to_string().contains("policies.json"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_unavailable() {
        assert!(AuthzError::StoreNotLoaded.is_unavailable());
        assert!(!AuthzError::InvalidTimezone("x".to_string()).is_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = AuthzError::TooManyPolicies { count: 12, max: 10 };
        assert_eq!(err.to_string(), "policy snapshot has 12 policies, limit is 10");
    }
}

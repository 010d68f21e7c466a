//! Error types for AccessMesh.
//!
//! [`AccessError`] is the terminal failure of the request pipeline. Each
//! pipeline stage produces exactly one kind, and each kind maps to exactly one
//! HTTP status:
//!
//! | Kind | Stage | Status |
//! |---|---|---|
//! | `AdmissionDenied` | rate limit | 429 |
//! | `InvalidCredential` | authentication | 401 |
//! | `AccessDenied` | authorization | 403 |
//! | `PolicyEvaluationFault` | authorization | 500 |
//!
//! None of them are retried by the gateway. The client-facing message is
//! always generic; the typed detail ([`CredentialError`], [`PolicyFault`]) is
//! for logs only.

use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`AccessError`].
pub type AccessResult<T> = Result<T, AccessError>;

/// Terminal failure of the request pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The client exceeded its rate budget.
    #[error("admission denied")]
    AdmissionDenied {
        /// Whole seconds until one token is available again.
        retry_after_seconds: u64,
    },

    /// The session credential was missing or did not verify.
    #[error("invalid credential: {0}")]
    InvalidCredential(#[from] CredentialError),

    /// No policy grants the requested access.
    #[error("access denied")]
    AccessDenied,

    /// Policies could not be evaluated at all.
    #[error("policy evaluation fault: {message}")]
    PolicyEvaluationFault {
        /// Internal detail, never sent to clients.
        message: String,
    },
}

impl AccessError {
    /// Creates an admission failure.
    #[must_use]
    pub const fn admission_denied(retry_after_seconds: u64) -> Self {
        Self::AdmissionDenied {
            retry_after_seconds,
        }
    }

    /// Creates an evaluation fault.
    #[must_use]
    pub fn evaluation_fault(message: impl Into<String>) -> Self {
        Self::PolicyEvaluationFault {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::PolicyEvaluationFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code used in response envelopes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AdmissionDenied { .. } => "RATE_LIMITED",
            Self::InvalidCredential(_) => "UNAUTHORIZED",
            Self::AccessDenied => "FORBIDDEN",
            Self::PolicyEvaluationFault { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the message safe to show clients.
    ///
    /// Never includes credential contents, policy documents or internal detail.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::AdmissionDenied { .. } => "Too many requests",
            Self::InvalidCredential(_) => "Authentication required",
            Self::AccessDenied => "Access denied",
            Self::PolicyEvaluationFault { .. } => "Internal server error",
        }
    }

    /// Returns the retry hint for admission failures.
    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::AdmissionDenied {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

/// Why a credential failed verification.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialError {
    /// No `Authorization` header was sent.
    #[error("credential missing")]
    Missing,
    /// The header was present but empty.
    #[error("credential empty")]
    Empty,
    /// The header used a scheme other than `Bearer`.
    #[error("unsupported authorization scheme")]
    MalformedScheme,
    /// The token could not be decoded.
    #[error("malformed token")]
    Malformed,
    /// The signature did not verify under the server secret.
    #[error("bad signature")]
    BadSignature,
    /// The token header names an algorithm other than the pinned one.
    #[error("unexpected signing algorithm")]
    UnexpectedAlgorithm,
    /// The token is at or past its expiry.
    #[error("token expired")]
    Expired,
    /// The payload decoded but its claims are unusable.
    #[error("invalid claims")]
    InvalidClaims,
}

impl CredentialError {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Empty => "empty",
            Self::MalformedScheme => "malformed_scheme",
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
            Self::UnexpectedAlgorithm => "unexpected_algorithm",
            Self::Expired => "expired",
            Self::InvalidClaims => "invalid_claims",
        }
    }
}

/// A stored policy condition that could not be interpreted.
///
/// Faults are local to one policy: the condition is treated as non-matching
/// and evaluation of the remaining policies continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyFault {
    /// An `ip_range` entry is not a CIDR block or address.
    #[error("policy {policy_id}: invalid ip range '{value}'")]
    InvalidCidr {
        /// Offending policy.
        policy_id: String,
        /// Raw condition value.
        value: String,
    },
    /// A `time_range` entry is not `HH:MM-HH:MM`.
    #[error("policy {policy_id}: invalid time window '{value}'")]
    InvalidTimeWindow {
        /// Offending policy.
        policy_id: String,
        /// Raw condition value.
        value: String,
    },
}

impl PolicyFault {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCidr { .. } => "invalid_cidr",
            Self::InvalidTimeWindow { .. } => "invalid_time_window",
        }
    }
}

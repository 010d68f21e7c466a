//! Error types for the gateway.

use thiserror::Error;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] accessmesh_config::ConfigError),

    /// Logging or metrics setup failed.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] accessmesh_telemetry::TelemetryError),

    /// Token, policy or store setup failed.
    #[error("Authorization setup error: {0}")]
    Authz(#[from] accessmesh_authz::AuthzError),

    /// The rate limiter settings are unusable.
    #[error("Rate limiter error: {0}")]
    Limiter(#[from] accessmesh_middleware::LimiterConfigError),

    /// The pipeline could not be assembled.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] accessmesh_middleware::PipelineError),

    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {message}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The upstream client could not be built.
    #[error("Proxy error: {message}")]
    Proxy {
        /// Error message.
        message: String,
    },

    /// The upstream request failed.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error message.
        message: String,
        /// Whether the request timed out.
        timed_out: bool,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a bind error.
    pub fn bind(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>, timed_out: bool) -> Self {
        Self::Upstream {
            message: message.into(),
            timed_out,
        }
    }

    /// HTTP status reported to the client for this error.
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Upstream {
                timed_out: true, ..
            } => http::StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } | Self::Proxy { .. } => http::StatusCode::BAD_GATEWAY,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_codes() {
        assert_eq!(
            GatewayError::upstream("refused", false).status_code(),
            http::StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::upstream("slow", true).status_code(),
            http::StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::bind("0.0.0.0:1", "in use").status_code(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::bind("127.0.0.1:8080", "address in use");
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:8080: address in use");
    }
}

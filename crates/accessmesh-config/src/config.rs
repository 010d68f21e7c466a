//! Main configuration type.
//!
//! This module provides the top-level [`AccessMeshConfig`] struct.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{
    AuthConfig, AuthorizationConfig, ConfigError, RateLimitConfig, RateLimitKey, ServerConfig,
    TelemetrySection, UpstreamConfig,
};

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use accessmesh_config::AccessMeshConfig;
///
/// let config = AccessMeshConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_err()); // no secret yet
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AccessMeshConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session token configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Admission control configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Policy enforcement configuration.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Upstream service configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Logging and metrics configuration.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl AccessMeshConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A listen address is not a socket address
    /// - `auth.secret` is empty
    /// - The rate limit settings are unusable (zero capacity, non-positive
    ///   refill, idle timeout shorter than a full refill)
    /// - `rate_limit.key = "header"` without `rate_limit.key_header`
    /// - `authorization.timezone` does not parse
    /// - `server.trusted_proxy_hops` is zero while forwarded headers are trusted
    /// - `upstream.url` is not an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_addr("server.http_addr", &self.server.http_addr)?;
        if self.server.trust_forwarded_headers && self.server.trusted_proxy_hops == 0 {
            return Err(ConfigError::invalid_value(
                "server.trusted_proxy_hops",
                "must be positive when forwarded headers are trusted",
            ));
        }

        if self.telemetry.metrics.enabled {
            validate_addr("telemetry.metrics.addr", &self.telemetry.metrics.addr)?;
        }

        if self.auth.secret.is_empty() {
            return Err(ConfigError::missing_field("auth.secret"));
        }
        if self.auth.token_lifetime_secs == 0 {
            return Err(ConfigError::invalid_value(
                "auth.token_lifetime_secs",
                "must be positive",
            ));
        }

        self.rate_limit
            .limiter_config()
            .validate()
            .map_err(|e| ConfigError::invalid_value("rate_limit", e.to_string()))?;
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.sweep_interval_secs",
                "must be positive",
            ));
        }
        if self.rate_limit.key == RateLimitKey::Header
            && self
                .rate_limit
                .key_header
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(ConfigError::missing_field("rate_limit.key_header"));
        }

        accessmesh_authz::parse_timezone(&self.authorization.timezone)
            .map_err(|e| ConfigError::invalid_value("authorization.timezone", e.to_string()))?;
        if self.authorization.max_policies == 0 {
            return Err(ConfigError::invalid_value(
                "authorization.max_policies",
                "must be positive",
            ));
        }

        if let Some(url) = &self.upstream.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid_value(
                    "upstream.url",
                    format!("expected an http(s) URL, got {url}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, metrics off, loopback bind.
    ///
    /// # Example
    ///
    /// ```
    /// use accessmesh_config::AccessMeshConfig;
    ///
    /// let config = AccessMeshConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.server.http_addr = "127.0.0.1:8080".to_string();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = accessmesh_telemetry::LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;

        config
    }

    /// Production preset: JSON info logs and metrics on.
    ///
    /// # Example
    ///
    /// ```
    /// use accessmesh_config::AccessMeshConfig;
    ///
    /// let config = AccessMeshConfig::production();
    /// assert_eq!(config.telemetry.logging.format, accessmesh_telemetry::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = accessmesh_telemetry::LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.metrics.enabled = true;

        config
    }
}

fn validate_addr(field: &str, value: &str) -> Result<(), ConfigError> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {value}")))
}

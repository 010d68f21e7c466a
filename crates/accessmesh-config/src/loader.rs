//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use accessmesh_middleware::stages::ActionMapping;
use accessmesh_telemetry::LogFormat;
use serde_json::Value;

use crate::{AccessMeshConfig, ConfigError, RateLimitKey};

/// Environment prefix used by the gateway binary.
pub const ENV_PREFIX: &str = "ACCESSMESH";

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values or a preset
/// 2. Configuration files (TOML or JSON), merged key by key
/// 3. `.env` file, if requested
/// 4. `PREFIX__SECTION__KEY` environment variables
///
/// # Example
///
/// ```no_run
/// use accessmesh_config::ConfigLoader;
///
/// # fn main() -> Result<(), accessmesh_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_file("accessmesh.toml")?
///     .with_dotenv()?
///     .with_env_prefix("ACCESSMESH")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: AccessMeshConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AccessMeshConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with development preset configuration.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = AccessMeshConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = AccessMeshConfig::production();
        self
    }

    /// Merge a configuration file over the current values.
    ///
    /// The format is chosen by extension (`.toml` or `.json`). Keys absent
    /// from the file keep their current values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist or cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::unsupported_format(path.display().to_string()))?;

        self.with_string(&content, &format)
    }

    /// Merge a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration text in the given format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use accessmesh_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     http_addr = "127.0.0.1:3000"
    ///
    ///     [auth]
    ///     secret = "s3cret"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let overlay: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::unsupported_format(format)),
        };

        let mut base = serde_json::to_value(&self.config)?;
        merge_values(&mut base, overlay);
        self.config = serde_json::from_value(base)?;
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `ACCESSMESH__AUTH__SECRET` or `ACCESSMESH__TELEMETRY__LOGGING__LEVEL`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file from the working directory, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::DotEnv(e.to_string())),
        }
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation
    /// fails.
    pub fn load(mut self) -> Result<AccessMeshConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> AccessMeshConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> =
            env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_override(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Server section
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_number(key, value)?;
            }
            ["SERVER", "MAX_CONNECTIONS"] => {
                config.server.max_connections = parse_number(key, value)?;
            }
            ["SERVER", "REQUEST_TIMEOUT_MS"] => {
                config.server.request_timeout_ms = parse_number(key, value)?;
            }
            ["SERVER", "MAX_BODY_BYTES"] => {
                config.server.max_body_bytes = parse_number(key, value)?;
            }
            ["SERVER", "TRUST_FORWARDED_HEADERS"] => {
                config.server.trust_forwarded_headers = parse_flag(key, value)?;
            }
            ["SERVER", "TRUSTED_PROXY_HOPS"] => {
                config.server.trusted_proxy_hops = parse_number(key, value)?;
            }
            ["SERVER", "TRUST_REQUEST_ID"] => {
                config.server.trust_request_id = parse_flag(key, value)?;
            }

            // Auth section
            ["AUTH", "SECRET"] => config.auth.secret = value.to_string(),
            ["AUTH", "TOKEN_LIFETIME_SECS"] => {
                config.auth.token_lifetime_secs = parse_number(key, value)?;
            }

            // Rate limit section
            ["RATE_LIMIT", "CAPACITY"] => config.rate_limit.capacity = parse_number(key, value)?,
            ["RATE_LIMIT", "REFILL_PER_SECOND"] => {
                config.rate_limit.refill_per_second = value
                    .parse()
                    .map_err(|_| ConfigError::env_override(key, "expected float"))?;
            }
            ["RATE_LIMIT", "IDLE_TIMEOUT_SECS"] => {
                config.rate_limit.idle_timeout_secs = parse_number(key, value)?;
            }
            ["RATE_LIMIT", "SWEEP_INTERVAL_SECS"] => {
                config.rate_limit.sweep_interval_secs = parse_number(key, value)?;
            }
            ["RATE_LIMIT", "KEY"] => {
                config.rate_limit.key = match value.to_lowercase().as_str() {
                    "ip" => RateLimitKey::Ip,
                    "header" => RateLimitKey::Header,
                    "global" => RateLimitKey::Global,
                    _ => {
                        return Err(ConfigError::env_override(
                            key,
                            "expected 'ip', 'header', or 'global'",
                        ))
                    }
                };
            }
            ["RATE_LIMIT", "KEY_HEADER"] => config.rate_limit.key_header = non_empty(value),

            // Authorization section
            ["AUTHORIZATION", "POLICY_FILE"] => {
                config.authorization.policy_file = non_empty(value);
            }
            ["AUTHORIZATION", "REFRESH_INTERVAL_SECS"] => {
                config.authorization.refresh_interval_secs = parse_number(key, value)?;
            }
            ["AUTHORIZATION", "MAX_POLICIES"] => {
                config.authorization.max_policies = parse_number(key, value)?;
            }
            ["AUTHORIZATION", "ACTION_MAPPING"] => {
                config.authorization.action_mapping = match value.to_lowercase().as_str() {
                    "crud" => ActionMapping::Crud,
                    "method" => ActionMapping::Method,
                    _ => return Err(ConfigError::env_override(key, "expected 'crud' or 'method'")),
                };
            }
            ["AUTHORIZATION", "TIMEZONE" | "UTC_OFFSET"] => {
                config.authorization.timezone = value.to_string();
            }

            // Upstream section
            ["UPSTREAM", "URL"] => config.upstream.url = non_empty(value),
            ["UPSTREAM", "TIMEOUT_MS"] => config.upstream.timeout_ms = parse_number(key, value)?,

            // Telemetry metrics
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                config.telemetry.metrics.addr = value.to_string();
            }

            // Telemetry logging
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env_override(key, "expected 'json' or 'pretty'")),
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                config.telemetry.logging.ansi_enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                config.telemetry.logging.include_location = parse_flag(key, value)?;
            }

            _ => {}
        }

        Ok(())
    }
}

/// Recursively merges `overlay` into `base`. Objects merge key by key;
/// everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_override(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_override(key, "expected boolean"))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::fmt;
use std::time::Duration;

use accessmesh_middleware::stages::ActionMapping;
use accessmesh_middleware::LimiterConfig;
use accessmesh_telemetry::{LogConfig, LogFormat, MetricsConfig};
use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use accessmesh_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "127.0.0.1:8080".to_string(),
///     ..Default::default()
/// };
/// assert!(!config.trust_forwarded_headers);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Request timeout in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Largest request body buffered before the pipeline runs.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Take the client address from `x-forwarded-for` instead of the peer.
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    /// Number of trusted proxies in front of the gateway. The client address
    /// is the `x-forwarded-for` entry this many places from the right.
    #[serde(default = "default_trusted_proxy_hops")]
    pub trusted_proxy_hops: usize,

    /// Keep a well-formed incoming `x-request-id` instead of minting one.
    #[serde(default)]
    pub trust_request_id: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_connections: default_max_connections(),
            request_timeout_ms: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            trust_forwarded_headers: false,
            trusted_proxy_hops: default_trusted_proxy_hops(),
            trust_request_id: false,
        }
    }
}

impl ServerConfig {
    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    10_000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_trusted_proxy_hops() -> usize {
    1
}

/// Session token settings.
///
/// `Debug` never prints the secret.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 signing secret. Required.
    #[serde(default)]
    pub secret: String,

    /// Lifetime of tokens minted by `issue-token`, in seconds.
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_lifetime_secs: default_token_lifetime(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .finish()
    }
}

fn default_token_lifetime() -> u64 {
    accessmesh_authz::DEFAULT_TOKEN_LIFETIME_SECS.unsigned_abs()
}

/// What identifies a client to the rate limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKey {
    /// Client IP address.
    #[default]
    Ip,
    /// The value of `rate_limit.key_header`, falling back to the client IP.
    Header,
    /// One bucket shared by every client.
    Global,
}

/// Admission control section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size).
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per second.
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,

    /// Buckets unused this long are evicted. Must cover a full refill.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the sweeper evicts idle buckets.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Client identity used as the bucket key.
    #[serde(default)]
    pub key: RateLimitKey,

    /// Header consulted when `key = "header"`.
    #[serde(default)]
    pub key_header: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill_per_second(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            key: RateLimitKey::default(),
            key_header: None,
        }
    }
}

impl RateLimitConfig {
    /// Limiter settings for this section.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            capacity: self.capacity,
            refill_per_second: self.refill_per_second,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    /// Sweeper period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_capacity() -> u32 {
    100
}

fn default_refill_per_second() -> f64 {
    10.0
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

/// Authorization section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// JSON policy file. Without one the store stays unloaded and every
    /// authorization fails closed.
    #[serde(default)]
    pub policy_file: Option<String>,

    /// How often the policy file is re-read. `0` disables refresh.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Largest policy set the store accepts.
    #[serde(default = "default_max_policies")]
    pub max_policies: usize,

    /// How request methods become policy actions.
    #[serde(default)]
    pub action_mapping: ActionMapping,

    /// Timezone used to evaluate time windows: an IANA name such as
    /// `Europe/Berlin`, or a fixed offset such as `+05:30`.
    #[serde(default = "default_timezone", alias = "utc_offset")]
    pub timezone: String,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            policy_file: None,
            refresh_interval_secs: default_refresh_interval(),
            max_policies: default_max_policies(),
            action_mapping: ActionMapping::default(),
            timezone: default_timezone(),
        }
    }
}

impl AuthorizationConfig {
    /// Refresh period, or `None` when refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_max_policies() -> usize {
    accessmesh_authz::DEFAULT_MAX_POLICIES
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Where allowed requests go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the protected service. Without one the gateway answers
    /// allowed requests itself (forward-auth mode).
    #[serde(default)]
    pub url: Option<String>,

    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Upstream request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_upstream_timeout() -> u64 {
    30_000
}

/// Metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Enable the Prometheus listener.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus listener address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,

    /// Histogram bucket boundaries for request duration.
    #[serde(default = "accessmesh_telemetry::metrics::default_duration_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
            histogram_buckets: accessmesh_telemetry::metrics::default_duration_buckets(),
        }
    }
}

impl From<&MetricsSection> for MetricsConfig {
    fn from(section: &MetricsSection) -> Self {
        Self {
            enabled: section.enabled,
            addr: section.addr.clone(),
            duration_buckets: section.histogram_buckets.clone(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log filter directive (trace, debug, info, warn, error or a full
    /// `EnvFilter` string).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

impl From<&LoggingSection> for LogConfig {
    fn from(section: &LoggingSection) -> Self {
        Self {
            enabled: section.enabled,
            level: section.level.clone(),
            format: section.format,
            file_line_info: section.include_location,
            include_target: true,
            ansi: section.ansi_enabled,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl From<&TelemetrySection> for accessmesh_telemetry::TelemetryConfig {
    fn from(section: &TelemetrySection) -> Self {
        Self {
            logging: LogConfig::from(&section.logging),
            metrics: MetricsConfig::from(&section.metrics),
        }
    }
}

fn default_true() -> bool {
    true
}

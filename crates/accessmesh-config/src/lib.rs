//! Typed configuration for the AccessMesh gateway.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → `.env` → env)
//!
//! # Example
//!
//! ```no_run
//! use accessmesh_config::{ConfigLoader, ENV_PREFIX};
//!
//! # fn main() -> Result<(), accessmesh_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_production()
//!     .with_optional_file("accessmesh.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix(ENV_PREFIX)
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! trust_forwarded_headers = false
//! trusted_proxy_hops = 1
//!
//! [auth]
//! secret = "change-me"
//! token_lifetime_secs = 86400
//!
//! [rate_limit]
//! capacity = 100
//! refill_per_second = 10.0
//! idle_timeout_secs = 600
//! key = "ip"
//!
//! [authorization]
//! policy_file = "/etc/accessmesh/policies.json"
//! refresh_interval_secs = 30
//! action_mapping = "crud"
//! timezone = "Europe/Berlin"
//!
//! [upstream]
//! url = "http://127.0.0.1:3000"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every value can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `ACCESSMESH__AUTH__SECRET=...`
//! - `ACCESSMESH__RATE_LIMIT__CAPACITY=50`
//! - `ACCESSMESH__TELEMETRY__LOGGING__FORMAT=pretty`

mod config;
mod error;
mod loader;
mod schema;

pub use config::AccessMeshConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::*;

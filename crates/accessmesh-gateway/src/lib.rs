//! # AccessMesh Gateway
//!
//! HTTP access-control gateway. Every request passes the fixed pipeline
//!
//! ```text
//! Request → RequestId → Admission → Authentication → Authorization → downstream
//! ```
//!
//! and, when allowed, is either proxied to the configured upstream or
//! answered directly with the caller's identity headers (forward-auth mode).
//!
//! ## Internal endpoints
//!
//! | Path                    | Meaning                                  |
//! |-------------------------|------------------------------------------|
//! | `/_accessmesh/health`   | liveness, always 200                     |
//! | `/_accessmesh/ready`    | 200 once policies are loaded, else 503   |
//!
//! ## Usage
//!
//! ```bash
//! $ accessmesh serve --config /etc/accessmesh/gateway.toml
//! $ accessmesh issue-token --role manager --config /etc/accessmesh/gateway.toml
//! ```

#![doc(html_root_url = "https://docs.rs/accessmesh-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod error;
pub mod health;
pub mod path;
pub mod proxy;
pub mod server;
pub mod shutdown;

pub use app::{build_downstream, build_pipeline, issue_token, App};
pub use error::{GatewayError, GatewayResult};
pub use health::{HealthChecker, HealthResponse, ReadinessResponse, ReadinessStatus};
pub use proxy::{Downstream, ForwardAuth, Forwarded, ProxyClient};
pub use server::{Gateway, ServerSettings};
pub use shutdown::ShutdownSignal;

/// Gateway version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

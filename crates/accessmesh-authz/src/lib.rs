//! AccessMesh Authorization - Session Tokens and Policy Enforcement
//!
//! This crate holds the decision logic of the gateway: it verifies session
//! credentials and decides requests against attribute-aware policies.
//!
//! # Overview
//!
//! - [`TokenVerifier`] / [`TokenIssuer`] - HS256 session tokens carrying
//!   [`Claims`](accessmesh_core::Claims)
//! - [`EnforcementEngine`] - default-deny evaluation of (role, resource,
//!   action) grants with CIDR and time-of-day conditions
//! - [`PolicyStore`] - source of immutable policy snapshots, with an in-memory
//!   implementation fed by a JSON [`PolicyFile`]
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!                      │   policies.json            │
//!                      └──────────┬─────────────────┘
//!                                 │ refresh
//!                      ┌──────────▼─────────────────┐
//!                      │   InMemoryPolicyStore      │
//!                      │   (Arc<[Policy]> snapshot) │
//!                      └──────────┬─────────────────┘
//!                                 │ snapshot()
//!                      ┌──────────▼─────────────────┐
//!     AccessRequest    │   EnforcementEngine        │
//!          │           └──────────┬─────────────────┘
//!          ▼                      │ enforce
//!     ┌────────────┐              │
//!     │ Middleware │──────────────▼
//!     └────────────┘   Decision (allow/deny)
//! ```
//!
//! # Example
//!
//! ```
//! use accessmesh_authz::{AccessRequest, EnforcementEngine, Enforcer};
//! use accessmesh_core::Policy;
//! use chrono::{TimeZone, Utc};
//!
//! let policies = vec![
//!     Policy::new("manager", "/api/v1/orders", "read")
//!         .with_ip_range("10.0.0.0/16")
//!         .with_time_range("08:00-18:00"),
//! ];
//!
//! let engine = EnforcementEngine::default();
//! let request = AccessRequest {
//!     role: "manager",
//!     resource: "/api/v1/orders",
//!     action: "read",
//!     source_ip: "10.0.3.4",
//!     at: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
//! };
//! assert!(engine.enforce(&request, &policies).allowed);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod conditions;
pub mod engine;
pub mod error;
pub mod store;
pub mod token;

// Re-exports for convenience
pub use conditions::{parse_timezone, TimeWindow, Timezone};
pub use engine::{AccessRequest, EnforcementEngine, Enforcer};
pub use error::{AuthzError, AuthzResult};
pub use store::{InMemoryPolicyStore, PolicyFile, PolicyStore, DEFAULT_MAX_POLICIES};
pub use token::{strip_scheme, TokenIssuer, TokenVerifier, DEFAULT_TOKEN_LIFETIME_SECS};

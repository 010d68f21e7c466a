//! # AccessMesh Middleware
//!
//! The fixed-order access-control pipeline of the AccessMesh gateway.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → RequestId → Admission → Authentication → Authorization → downstream
//! ```
//!
//! | Stage | Middleware       | Failure                    |
//! |-------|------------------|----------------------------|
//! | 1     | Request ID       | none                       |
//! | 2     | Admission        | 429 `AdmissionDenied`      |
//! | 3     | Authentication   | 401 `InvalidCredential`    |
//! | 4     | Authorization    | 403 `AccessDenied`, 500 `PolicyEvaluationFault` |
//!
//! The first failing stage terminates the request. Stages cannot be
//! reordered or skipped: [`PipelineBuilder::build`] rejects a pipeline with a
//! missing stage.
//!
//! ## Example
//!
//! ```
//! use accessmesh_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 4);
//! assert_eq!(stages[0].name(), "request_id");
//! assert_eq!(stages[3].name(), "authorization");
//! ```

#![doc(html_root_url = "https://docs.rs/accessmesh-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod limiter;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use limiter::{Admission, LimiterConfig, LimiterConfigError, RateLimiter};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, Stage};
pub use types::{Request, Response, ResponseExt};

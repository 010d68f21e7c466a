//! Core middleware stages.
//!
//! The four mandatory stages, in pipeline order:
//!
//! 1. [`request_id`] - Generate/propagate request ID
//! 2. [`rate_limit`] - Token-bucket admission control
//! 3. [`authentication`] - Session token verification
//! 4. [`authorization`] - Policy enforcement

pub mod authentication;
pub mod authorization;
pub mod rate_limit;
pub mod request_id;

// Re-export main types
pub use authentication::AuthenticationMiddleware;
pub use authorization::{ActionMapping, AuthorizationMiddleware, AuthorizationResult};
pub use rate_limit::{KeyExtractor, RateLimitMiddleware};
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};

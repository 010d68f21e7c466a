//! # AccessMesh Core
//!
//! Core types shared by every AccessMesh crate.
//!
//! - [`Claims`] - Attributes extracted from a verified session credential
//! - [`Policy`] - A stored (role, resource, action) grant with attribute conditions
//! - [`Decision`] - The outcome of an enforcement call
//! - [`AccessError`] - The four terminal failure kinds of the request pipeline
//! - [`RequestId`] - UUID v7 request identifier
//! - [`Clock`] - Source of the current time, injectable for tests

#![doc(html_root_url = "https://docs.rs/accessmesh-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod claims;
mod clock;
mod context;
mod decision;
mod error;
mod policy;

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use context::RequestId;
pub use decision::{Decision, DecisionReason};
pub use error::{AccessError, AccessResult, CredentialError, PolicyFault};
pub use policy::{Conditions, Policy, ResourceMatch};

//! Stored policy records.
//!
//! The JSON shape follows the policy documents of the store:
//!
//! ```json
//! {
//!   "id": "0190...",
//!   "role": "manager",
//!   "resource": "/api/v1/orders",
//!   "action": "read",
//!   "conditions": { "ip_range": ["10.0.0.0/16"], "time_range": ["08:00-18:00"] },
//!   "created_at": "2024-01-01T00:00:00Z",
//!   "updated_at": "2024-01-01T00:00:00Z"
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timestamp;

/// How a policy's `resource` is compared with the requested resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMatch {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// The pattern is a prefix ending on a path segment boundary.
    Prefix,
}

/// Attribute constraints attached to a policy.
///
/// An empty list leaves that attribute unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// CIDR blocks (or bare addresses) the source IP must fall in.
    #[serde(rename = "ip_range", default)]
    pub ip_ranges: Vec<String>,
    /// `HH:MM-HH:MM` windows the local time of day must fall in.
    #[serde(rename = "time_range", default)]
    pub time_ranges: Vec<String>,
}

impl Conditions {
    /// Returns `true` if neither attribute is constrained.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.ip_ranges.is_empty() && self.time_ranges.is_empty()
    }
}

/// A grant of `action` on `resource` to `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Opaque identifier.
    pub id: String,
    /// Role the grant applies to.
    pub role: String,
    /// Resource pattern.
    pub resource: String,
    /// How `resource` is matched.
    #[serde(default)]
    pub resource_match: ResourceMatch,
    /// Action name, compared case-sensitively.
    pub action: String,
    /// Attribute constraints.
    #[serde(default)]
    pub conditions: Conditions,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: Timestamp,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: Timestamp,
}

impl Policy {
    /// Creates an unconstrained exact-match policy with a fresh id.
    #[must_use]
    pub fn new(
        role: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            role: role.into(),
            resource: resource.into(),
            resource_match: ResourceMatch::Exact,
            action: action.into(),
            conditions: Conditions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Switches to prefix matching.
    #[must_use]
    pub fn prefix(mut self) -> Self {
        self.resource_match = ResourceMatch::Prefix;
        self
    }

    /// Adds an `ip_range` entry.
    #[must_use]
    pub fn with_ip_range(mut self, range: impl Into<String>) -> Self {
        self.conditions.ip_ranges.push(range.into());
        self
    }

    /// Adds a `time_range` entry.
    #[must_use]
    pub fn with_time_range(mut self, window: impl Into<String>) -> Self {
        self.conditions.time_ranges.push(window.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let policy = Policy::new("manager", "/api/v1/orders", "read")
            .with_id("p1")
            .prefix()
            .with_ip_range("10.0.0.0/16")
            .with_time_range("08:00-18:00");

        assert_eq!(policy.id, "p1");
        assert_eq!(policy.resource_match, ResourceMatch::Prefix);
        assert_eq!(policy.conditions.ip_ranges, vec!["10.0.0.0/16"]);
        assert!(!policy.conditions.is_unconstrained());
    }

    #[test]
    fn test_deserialize_store_document() {
        let json = r#"{
            "id": "p1",
            "role": "manager",
            "resource": "/api/v1/orders",
            "action": "read",
            "conditions": { "ip_range": ["10.0.0.0/16"], "time_range": [] },
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.resource_match, ResourceMatch::Exact);
        assert_eq!(policy.conditions.ip_ranges.len(), 1);
        assert!(policy.conditions.time_ranges.is_empty());
    }

    #[test]
    fn test_deserialize_minimal() {
        let json = r#"{"id":"p2","role":"admin","resource":"/api/","resource_match":"prefix","action":"delete"}"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.resource_match, ResourceMatch::Prefix);
        assert!(policy.conditions.is_unconstrained());
    }
}

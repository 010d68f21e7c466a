//! Enforcement outcomes.

use serde::{Deserialize, Serialize};

/// Why the engine reached a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// At least one policy matched every attribute.
    PolicyMatched,
    /// The role has policies but none matched.
    NoMatchingPolicy,
    /// The snapshot holds no policy for the role.
    NoPoliciesForRole,
}

impl DecisionReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyMatched => "policy_matched",
            Self::NoMatchingPolicy => "no_matching_policy",
            Self::NoPoliciesForRole => "no_policies_for_role",
        }
    }
}

/// Allow/deny outcome of one enforcement call.
///
/// Does not identify which policy matched, so the value is the same for any
/// ordering of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Why.
    pub reason: DecisionReason,
}

impl Decision {
    /// An allow decision.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::PolicyMatched,
        }
    }

    /// A deny decision with the given reason.
    #[must_use]
    pub const fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(Decision::allow().allowed);
        let denied = Decision::deny(DecisionReason::NoPoliciesForRole);
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_str(), "no_policies_for_role");
    }

    #[test]
    fn test_reason_serialization() {
        let json = serde_json::to_string(&DecisionReason::NoMatchingPolicy).unwrap();
        assert_eq!(json, "\"no_matching_policy\"");
    }
}

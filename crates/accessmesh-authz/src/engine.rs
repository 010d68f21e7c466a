//! Policy enforcement.
//!
//! A policy matches a request iff all of the following hold:
//!
//! - its role equals the requesting role
//! - its resource equals the requested resource, or for `prefix` policies is a
//!   prefix of it ending on a path segment boundary
//! - its action equals the requested action (case-sensitive)
//! - `ip_range` is empty, or the source IP lies in at least one range
//! - `time_range` is empty, or the local time of day lies in at least one window
//!
//! The engine is default-deny: any single match allows, nothing else does.
//! There is no priority between policies, so the decision does not depend on
//! snapshot order.

use std::net::IpAddr;

use accessmesh_core::{Decision, DecisionReason, Policy, PolicyFault, ResourceMatch, Timestamp};
use tracing::{debug, instrument, warn};

use crate::conditions::{minute_of_day, parse_ip_range, parse_source_ip, TimeWindow, Timezone};

/// The attributes of one access attempt.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Authenticated role.
    pub role: &'a str,
    /// Requested resource, usually the request path.
    pub resource: &'a str,
    /// Requested action.
    pub action: &'a str,
    /// Client address as text.
    pub source_ip: &'a str,
    /// When the request arrived.
    pub at: Timestamp,
}

/// Decides access requests against a policy snapshot.
pub trait Enforcer: Send + Sync + std::fmt::Debug {
    /// Returns the decision for `request` under `policies`.
    ///
    /// Never fails: unusable conditions make their policy non-matching.
    fn enforce(&self, request: &AccessRequest<'_>, policies: &[Policy]) -> Decision;
}

/// The attribute-aware policy engine.
///
/// Time windows are interpreted in the server's configured timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnforcementEngine {
    timezone: Timezone,
}

impl EnforcementEngine {
    /// Creates an engine evaluating time windows in `timezone`.
    pub fn new(timezone: impl Into<Timezone>) -> Self {
        Self {
            timezone: timezone.into(),
        }
    }

    /// Returns the configured timezone.
    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    fn conditions_hold(&self, policy: &Policy, source: Option<IpAddr>, at: Timestamp) -> bool {
        match self.check_conditions(policy, source, at) {
            Ok(holds) => holds,
            Err(fault) => {
                warn!(
                    policy_id = %policy.id,
                    kind = fault.kind(),
                    error = %fault,
                    "policy condition unusable, treating policy as non-matching"
                );
                metrics::counter!("accessmesh_policy_faults_total", "kind" => fault.kind())
                    .increment(1);
                false
            }
        }
    }

    fn check_conditions(
        &self,
        policy: &Policy,
        source: Option<IpAddr>,
        at: Timestamp,
    ) -> Result<bool, PolicyFault> {
        let conditions = &policy.conditions;

        let mut ip_ok = conditions.ip_ranges.is_empty();
        for raw in &conditions.ip_ranges {
            let net = parse_ip_range(raw).ok_or_else(|| PolicyFault::InvalidCidr {
                policy_id: policy.id.clone(),
                value: raw.clone(),
            })?;
            if source.is_some_and(|ip| net.contains(&ip)) {
                ip_ok = true;
            }
        }

        let minute = minute_of_day(at, self.timezone);
        let mut time_ok = conditions.time_ranges.is_empty();
        for raw in &conditions.time_ranges {
            let window = raw
                .parse::<TimeWindow>()
                .map_err(|()| PolicyFault::InvalidTimeWindow {
                    policy_id: policy.id.clone(),
                    value: raw.clone(),
                })?;
            if window.contains(minute) {
                time_ok = true;
            }
        }

        Ok(ip_ok && time_ok)
    }
}

impl Enforcer for EnforcementEngine {
    #[instrument(level = "debug", skip(self, policies), fields(
        role = %request.role,
        resource = %request.resource,
        action = %request.action,
        policies = policies.len()
    ))]
    fn enforce(&self, request: &AccessRequest<'_>, policies: &[Policy]) -> Decision {
        let source = parse_source_ip(request.source_ip);
        let mut role_seen = false;

        for policy in policies.iter().filter(|p| p.role == request.role) {
            role_seen = true;

            if !resource_matches(policy, request.resource) || policy.action != request.action {
                continue;
            }
            if self.conditions_hold(policy, source, request.at) {
                debug!(policy_id = %policy.id, "policy matched");
                return Decision::allow();
            }
        }

        let reason = if role_seen {
            DecisionReason::NoMatchingPolicy
        } else {
            DecisionReason::NoPoliciesForRole
        };
        debug!(reason = reason.as_str(), "access denied");
        Decision::deny(reason)
    }
}

/// Returns `true` if `policy` covers `resource`.
pub fn resource_matches(policy: &Policy, resource: &str) -> bool {
    match policy.resource_match {
        ResourceMatch::Exact => policy.resource == resource,
        ResourceMatch::Prefix => prefix_matches(&policy.resource, resource),
    }
}

/// Segment-aware prefix match: `/api/v1` covers `/api/v1` and `/api/v1/orders`
/// but not `/api/v10`.
fn prefix_matches(pattern: &str, resource: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match resource.strip_prefix(pattern) {
        Some("") => true,
        Some(rest) => pattern.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

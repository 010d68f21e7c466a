//! Liveness and readiness reporting.
//!
//! Served at `/_accessmesh/health` and `/_accessmesh/ready`, ahead of the
//! pipeline, so probes are neither rate limited nor authenticated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use accessmesh_authz::PolicyStore;
use serde::{Deserialize, Serialize};

/// Path of the liveness endpoint.
pub const HEALTH_PATH: &str = "/_accessmesh/health";

/// Path of the readiness endpoint.
pub const READY_PATH: &str = "/_accessmesh/ready";

/// Readiness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    /// Accepting traffic.
    Ready,
    /// Not accepting traffic.
    NotReady,
}

impl ReadinessStatus {
    /// Check if the gateway is ready.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Liveness response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness.
    pub status: ReadinessStatus,
    /// Whether a policy snapshot is loaded.
    pub policies_loaded: bool,
    /// Whether the gateway is draining for shutdown.
    pub draining: bool,
}

/// Tracks liveness and readiness.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: Instant,
    draining: AtomicBool,
    store: Arc<dyn PolicyStore>,
}

impl HealthChecker {
    /// Creates a checker whose readiness follows `store`.
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            start_time: Instant::now(),
            draining: AtomicBool::new(false),
            store,
        }
    }

    /// Marks the gateway as draining; readiness fails from now on.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Liveness report.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            version: crate::VERSION.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Readiness report: ready once policies are loaded and until draining.
    pub fn readiness(&self) -> ReadinessResponse {
        let policies_loaded = self.store.is_ready();
        let draining = self.draining.load(Ordering::SeqCst);
        let status = if policies_loaded && !draining {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::NotReady
        };

        ReadinessResponse {
            status,
            policies_loaded,
            draining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmesh_authz::InMemoryPolicyStore;

    #[test]
    fn test_not_ready_until_policies_load() {
        let store = Arc::new(InMemoryPolicyStore::default());
        let health = HealthChecker::new(store.clone());

        let report = health.readiness();
        assert_eq!(report.status, ReadinessStatus::NotReady);
        assert!(!report.policies_loaded);

        store.replace(Vec::new()).unwrap();
        assert!(health.readiness().status.is_ready());
    }

    #[test]
    fn test_draining_is_not_ready() {
        let store = Arc::new(InMemoryPolicyStore::with_policies(Vec::new()).unwrap());
        let health = HealthChecker::new(store);
        health.set_draining();

        let report = health.readiness();
        assert!(!report.status.is_ready());
        assert!(report.draining);
    }

    #[test]
    fn test_liveness_reports_version() {
        let health = HealthChecker::new(Arc::new(InMemoryPolicyStore::default()));
        let report = health.liveness();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.version, crate::VERSION);
    }
}

//! Policy snapshots.
//!
//! The engine never reads policies from storage directly. It is handed an
//! immutable snapshot by a [`PolicyStore`]. Refreshing the store swaps the
//! snapshot pointer; requests already holding the old snapshot finish against
//! it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use accessmesh_core::Policy;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AuthzError, AuthzResult};

/// Default upper bound on policies per snapshot.
pub const DEFAULT_MAX_POLICIES: usize = 10_000;

/// Source of the current policy snapshot.
pub trait PolicyStore: Send + Sync + std::fmt::Debug {
    /// Returns the current snapshot.
    ///
    /// An error means no decision can be made and the request fails closed.
    fn snapshot(&self) -> AuthzResult<Arc<[Policy]>>;

    /// Returns `true` once a snapshot is available.
    fn is_ready(&self) -> bool {
        self.snapshot().is_ok()
    }
}

/// In-process policy store.
///
/// Starts unloaded unless built with [`InMemoryPolicyStore::with_policies`].
#[derive(Debug)]
pub struct InMemoryPolicyStore {
    current: RwLock<Option<Arc<[Policy]>>>,
    max_policies: usize,
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POLICIES)
    }
}

impl InMemoryPolicyStore {
    /// Creates an empty, unloaded store.
    pub fn new(max_policies: usize) -> Self {
        Self {
            current: RwLock::new(None),
            max_policies,
        }
    }

    /// Creates a store already holding `policies`.
    pub fn with_policies(policies: Vec<Policy>) -> AuthzResult<Self> {
        let store = Self::default();
        store.replace(policies)?;
        Ok(store)
    }

    /// Returns the snapshot size limit.
    pub fn max_policies(&self) -> usize {
        self.max_policies
    }

    /// Swaps in a new snapshot and returns its size.
    ///
    /// A snapshot over the limit is rejected and the previous one kept.
    pub fn replace(&self, policies: Vec<Policy>) -> AuthzResult<usize> {
        let count = policies.len();
        if count > self.max_policies {
            return Err(AuthzError::TooManyPolicies {
                count,
                max: self.max_policies,
            });
        }
        *self.current.write() = Some(Arc::from(policies));
        debug!(policies = count, "policy snapshot replaced");
        Ok(count)
    }

    /// Returns the number of policies in the current snapshot.
    pub fn len(&self) -> usize {
        self.current.read().as_ref().map_or(0, |p| p.len())
    }

    /// Returns `true` if the current snapshot is empty or absent.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn snapshot(&self) -> AuthzResult<Arc<[Policy]>> {
        self.current
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(AuthzError::StoreNotLoaded)
    }

    fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }
}

/// Policy file layouts accepted by [`PolicyFile`].
#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyDocument {
    List(Vec<Policy>),
    Wrapped { policies: Vec<Policy> },
}

impl PolicyDocument {
    fn into_policies(self) -> Vec<Policy> {
        match self {
            Self::List(policies) | Self::Wrapped { policies } => policies,
        }
    }
}

/// A JSON policy file feeding an [`InMemoryPolicyStore`].
///
/// The file holds either an array of policy records or an object with a
/// `policies` array.
#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
    store: Arc<InMemoryPolicyStore>,
}

impl PolicyFile {
    /// Binds `path` to `store`.
    pub fn new(path: impl Into<PathBuf>, store: Arc<InMemoryPolicyStore>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the file without touching the store.
    pub async fn read(&self) -> AuthzResult<Vec<Policy>> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AuthzError::policy_load(&self.path, e.to_string()))?;
        let document: PolicyDocument = serde_json::from_slice(&content)
            .map_err(|e| AuthzError::policy_load(&self.path, e.to_string()))?;
        Ok(document.into_policies())
    }

    /// Reads the file and swaps it into the store.
    pub async fn load(&self) -> AuthzResult<usize> {
        let policies = self.read().await?;
        let count = self.store.replace(policies)?;
        info!(path = %self.path.display(), policies = count, "policies loaded");
        Ok(count)
    }

    /// Spawns a task reloading the file every `every`.
    ///
    /// A failed reload is logged and the previous snapshot stays in place.
    pub fn spawn_refresh(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial load is the caller's.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.load().await {
                    warn!(path = %self.path.display(), error = %e, "policy refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}

//! Assembles a gateway from configuration.

use std::sync::Arc;

use accessmesh_authz::{
    parse_timezone, EnforcementEngine, InMemoryPolicyStore, PolicyFile, PolicyStore,
    TokenIssuer, TokenVerifier,
};
use accessmesh_config::{AccessMeshConfig, ConfigError, RateLimitKey};
use accessmesh_core::{Clock, SystemClock};
use accessmesh_middleware::stages::{
    AuthenticationMiddleware, AuthorizationMiddleware, KeyExtractor, RateLimitMiddleware,
    RequestIdMiddleware,
};
use accessmesh_middleware::{Pipeline, RateLimiter};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::GatewayResult;
use crate::health::HealthChecker;
use crate::proxy::{Downstream, ForwardAuth, ProxyClient};
use crate::server::{Gateway, ServerSettings};
use crate::shutdown::ShutdownSignal;

/// A configured gateway and the background tasks feeding it.
#[derive(Debug)]
pub struct App {
    gateway: Gateway,
    store: Arc<InMemoryPolicyStore>,
    limiter: Arc<RateLimiter>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Builds the app on the system clock.
    pub async fn from_config(config: &AccessMeshConfig) -> GatewayResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Builds the app on `clock`.
    ///
    /// Loads the policy file once and fails if it cannot be read. Refresh and
    /// bucket sweeping run as background tasks until the gateway stops.
    pub async fn with_clock(config: &AccessMeshConfig, clock: Arc<dyn Clock>) -> GatewayResult<Self> {
        let store = Arc::new(InMemoryPolicyStore::new(config.authorization.max_policies));
        let mut tasks = Vec::new();

        match &config.authorization.policy_file {
            Some(path) => {
                let file = PolicyFile::new(path, Arc::clone(&store));
                file.load().await?;
                if let Some(every) = config.authorization.refresh_interval() {
                    tasks.push(file.spawn_refresh(every));
                }
            }
            None => warn!("no policy file configured, every request will fail authorization"),
        }

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config())?);
        tasks.push(limiter.spawn_sweeper(Arc::clone(&clock), config.rate_limit.sweep_interval()));

        let pipeline = build_pipeline(
            config,
            Arc::clone(&clock),
            Arc::clone(&store) as Arc<dyn PolicyStore>,
            Arc::clone(&limiter),
        )?;
        info!(stages = ?pipeline.stage_names(), "pipeline assembled");

        let downstream = build_downstream(config)?;
        let health = Arc::new(HealthChecker::new(Arc::clone(&store) as Arc<dyn PolicyStore>));
        let gateway = Gateway::new(
            ServerSettings::from(&config.server),
            pipeline,
            downstream,
            health,
        );

        Ok(Self {
            gateway,
            store,
            limiter,
            tasks,
        })
    }

    /// The gateway server.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The policy store.
    pub fn store(&self) -> &Arc<InMemoryPolicyStore> {
        &self.store
    }

    /// The admission limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Binds the configured address and runs until `shutdown` fires, then
    /// stops background tasks.
    pub async fn run(self, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let listener = self.gateway.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let Self { gateway, tasks, .. } = self;
        let result = gateway.serve(listener, shutdown).await;
        for task in tasks {
            task.abort();
        }
        result
    }
}

/// Builds the four-stage pipeline described by `config`.
pub fn build_pipeline(
    config: &AccessMeshConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn PolicyStore>,
    limiter: Arc<RateLimiter>,
) -> GatewayResult<Pipeline> {
    let verifier = Arc::new(TokenVerifier::new(config.auth.secret.as_bytes())?);
    let timezone = parse_timezone(&config.authorization.timezone)?;

    let key_extractor = match config.rate_limit.key {
        RateLimitKey::Ip => KeyExtractor::Ip,
        RateLimitKey::Global => KeyExtractor::Global,
        RateLimitKey::Header => match &config.rate_limit.key_header {
            Some(header) => KeyExtractor::Header(header.to_ascii_lowercase()),
            None => KeyExtractor::Ip,
        },
    };

    let request_id = if config.server.trust_request_id {
        RequestIdMiddleware::trust_incoming()
    } else {
        RequestIdMiddleware::new()
    };

    let pipeline = Pipeline::builder()
        .request_id(request_id)
        .admission(
            RateLimitMiddleware::builder(limiter, Arc::clone(&clock))
                .key_extractor(key_extractor)
                .build(),
        )
        .authentication(AuthenticationMiddleware::new(verifier, Arc::clone(&clock)))
        .authorization(
            AuthorizationMiddleware::new(Arc::new(EnforcementEngine::new(timezone)), store, clock)
                .with_action_mapping(config.authorization.action_mapping),
        )
        .build()?;

    Ok(pipeline)
}

/// Picks the downstream: the upstream proxy when a URL is set, forward-auth
/// answers otherwise.
pub fn build_downstream(config: &AccessMeshConfig) -> GatewayResult<Arc<dyn Downstream>> {
    match &config.upstream.url {
        Some(url) => {
            let client = ProxyClient::new(url.as_str(), config.upstream.timeout())?;
            info!(upstream = %client.upstream_url(), "proxying allowed requests");
            Ok(Arc::new(client))
        }
        None => {
            info!("no upstream configured, answering in forward-auth mode");
            Ok(Arc::new(ForwardAuth))
        }
    }
}

/// Mints a token for `role` with the configured secret and lifetime.
pub fn issue_token(config: &AccessMeshConfig, role: &str, clock: &dyn Clock) -> GatewayResult<String> {
    let lifetime = i64::try_from(config.auth.token_lifetime_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| {
            ConfigError::invalid_value("auth.token_lifetime_secs", "out of range")
        })?;
    let issuer = TokenIssuer::new(config.auth.secret.as_bytes())?.with_lifetime(lifetime);
    Ok(issuer.issue(role, clock.now())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmesh_core::ManualClock;
    use chrono::{TimeZone, Utc};

    fn config() -> AccessMeshConfig {
        let mut config = AccessMeshConfig::development();
        config.auth.secret = "test-secret-of-reasonable-length".to_string();
        config
    }

    #[test]
    fn test_pipeline_has_all_stages() {
        let config = config();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config()).unwrap());
        let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::default());

        let pipeline = build_pipeline(&config, clock, store, limiter).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["request_id", "admission", "authentication", "authorization"]
        );
    }

    #[test]
    fn test_bad_timezone_is_rejected() {
        let mut config = config();
        config.authorization.timezone = "Mars/Olympus".to_string();
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config()).unwrap());

        let result = build_pipeline(
            &config,
            Arc::new(SystemClock),
            Arc::new(InMemoryPolicyStore::default()),
            limiter,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_downstream_selection() {
        let mut config = config();
        let forward_auth = build_downstream(&config).unwrap();
        assert!(format!("{forward_auth:?}").contains("ForwardAuth"));

        config.upstream.url = Some("http://127.0.0.1:9000".to_string());
        let proxy = build_downstream(&config).unwrap();
        assert!(format!("{proxy:?}").contains("ProxyClient"));
    }

    #[test]
    fn test_issue_token_verifies() {
        let config = config();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap());

        let token = issue_token(&config, "manager", &clock).unwrap();
        let verifier = TokenVerifier::new(config.auth.secret.as_bytes()).unwrap();
        let claims = verifier.verify(&token, clock.now()).unwrap();
        assert_eq!(claims.role, "manager");
    }

    #[tokio::test]
    async fn test_missing_policy_file_fails_startup() {
        let mut config = config();
        config.authorization.policy_file = Some("/nonexistent/policies.json".to_string());
        assert!(App::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_app_without_policy_file_is_not_ready() {
        let app = App::from_config(&config()).await.unwrap();
        assert!(!app.gateway().health().readiness().status.is_ready());
        assert!(!app.store().is_ready());
    }
}

//! Authentication middleware.
//!
//! Verifies the `Authorization: Bearer <token>` session credential and stores
//! the resulting claims in the context. Every failure produces the same
//! generic 401; the specific [`CredentialError`] is only logged.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use accessmesh_authz::TokenVerifier;
use accessmesh_core::{AccessError, Clock, CredentialError};
use http::header::AUTHORIZATION;
use std::sync::Arc;
use tracing::debug;

/// Middleware that authenticates session credentials.
#[derive(Debug, Clone)]
pub struct AuthenticationMiddleware {
    verifier: Arc<TokenVerifier>,
    clock: Arc<dyn Clock>,
}

impl AuthenticationMiddleware {
    /// Creates an authentication middleware.
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>, clock: Arc<dyn Clock>) -> Self {
        Self { verifier, clock }
    }

    fn authenticate(&self, request: &Request) -> Result<accessmesh_core::Claims, CredentialError> {
        let value = request
            .headers()
            .get(AUTHORIZATION)
            .ok_or(CredentialError::Missing)?
            .to_str()
            .map_err(|_| CredentialError::Malformed)?;
        self.verifier.verify(value, self.clock.now())
    }
}

impl Middleware for AuthenticationMiddleware {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.authenticate(&request) {
                Ok(claims) => {
                    metrics::counter!("accessmesh_authentication_total", "result" => "ok")
                        .increment(1);
                    ctx.set_claims(claims);
                    next.run(ctx, request).await
                }
                Err(kind) => {
                    metrics::counter!("accessmesh_authentication_total", "result" => kind.as_str())
                        .increment(1);
                    debug!(
                        request_id = %ctx.request_id(),
                        reason = kind.as_str(),
                        "authentication failed"
                    );
                    Response::access_error(&AccessError::InvalidCredential(kind))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmesh_authz::TokenIssuer;
    use accessmesh_core::{ManualClock, Timestamp};
    use bytes::Bytes;
    use chrono::{Duration, TimeZone, Utc};
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::{BodyExt, Full};

    const SECRET: &[u8] = b"middleware-test-secret";

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    fn middleware(clock: &ManualClock) -> AuthenticationMiddleware {
        AuthenticationMiddleware::new(
            Arc::new(TokenVerifier::new(SECRET).unwrap()),
            Arc::new(clock.clone()),
        )
    }

    fn request_with(authorization: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/api/v1/orders");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn role_echo() -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> {
        |ctx, _req| {
            let role = ctx.role().unwrap_or_default().to_string();
            Box::pin(async move {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from(role)))
                    .unwrap()
            })
        }
    }

    #[tokio::test]
    async fn test_valid_token_sets_claims() {
        let clock = ManualClock::new(t0());
        let token = TokenIssuer::new(SECRET).unwrap().issue("manager", t0()).unwrap();

        let mut ctx = MiddlewareContext::new();
        let response = middleware(&clock)
            .process(
                &mut ctx,
                request_with(Some(&format!("Bearer {token}"))),
                Next::handler(role_echo()),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.role(), Some("manager"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"manager");
    }

    #[tokio::test]
    async fn test_failures_are_uniform_401() {
        let clock = ManualClock::new(t0());
        let expired = TokenIssuer::new(SECRET)
            .unwrap()
            .with_lifetime(Duration::seconds(10))
            .issue("manager", t0() - Duration::seconds(20))
            .unwrap();
        let forged = TokenIssuer::new(b"other").unwrap().issue("admin", t0()).unwrap();

        let cases = [
            None,
            Some(String::new()),
            Some("Basic dXNlcjpwYXNz".to_string()),
            Some("Bearer garbage".to_string()),
            Some(format!("Bearer {expired}")),
            Some(format!("Bearer {forged}")),
        ];

        let mut bodies = Vec::new();
        for case in cases {
            let mut ctx = MiddlewareContext::new();
            let response = middleware(&clock)
                .process(&mut ctx, request_with(case.as_deref()), Next::handler(role_echo()))
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{case:?}");
            assert!(ctx.claims().is_none());
            bodies.push(response.into_body().collect().await.unwrap().to_bytes());
        }
        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let clock = ManualClock::new(t0());
        let token = TokenIssuer::new(SECRET)
            .unwrap()
            .with_lifetime(Duration::seconds(60))
            .issue("manager", t0())
            .unwrap();
        let header = format!("Bearer {token}");
        let mw = middleware(&clock);

        let mut ctx = MiddlewareContext::new();
        let ok = mw
            .process(&mut ctx, request_with(Some(&header)), Next::handler(role_echo()))
            .await;
        assert_eq!(ok.status(), StatusCode::OK);

        clock.advance(Duration::seconds(60));
        let mut ctx = MiddlewareContext::new();
        let expired = mw
            .process(&mut ctx, request_with(Some(&header)), Next::handler(role_echo()))
            .await;
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
    }
}

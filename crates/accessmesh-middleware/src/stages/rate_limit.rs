//! Rate limiting middleware.
//!
//! Admission control runs before authentication: a client over its budget is
//! rejected with `429 Too Many Requests` before any token is verified.
//!
//! ## Keys
//!
//! - **Per-IP** (default): the resolved client address
//! - **Per-header**: the value of a named header, e.g. an API key, nested
//!   under the per-IP budget
//! - **Global**: one bucket shared by all requests
//!
//! ## Example
//!
//! ```ignore
//! use accessmesh_middleware::stages::RateLimitMiddleware;
//!
//! let rate_limit = RateLimitMiddleware::builder(limiter, clock)
//!     .per_header("x-api-key")
//!     .build();
//! ```

use crate::context::MiddlewareContext;
use crate::limiter::{Admission, RateLimiter};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use accessmesh_core::{AccessError, Clock};
use http::HeaderValue;
use std::sync::Arc;
use tracing::debug;

/// Rate limit header names.
pub mod headers {
    /// Bucket capacity.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Whole tokens left.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds until a token is available (on 429).
    pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Bucket key used when the client address is unknown.
pub const UNKNOWN_CLIENT_KEY: &str = "unknown";

/// Bucket key used by [`KeyExtractor::Global`].
pub const GLOBAL_KEY: &str = "global";

/// How to extract the rate limit key from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyExtractor {
    /// Use the client IP address as the key.
    #[default]
    Ip,
    /// Use a specific header value as the key.
    ///
    /// The header is client-supplied and read before authentication, so the
    /// per-IP bucket is always charged first and the header bucket only once
    /// the IP is admitted. Rotating header values cannot exceed the IP budget.
    /// Requests without the header are keyed by IP alone.
    Header(String),
    /// Global rate limit (single key for all requests).
    Global,
}

/// Rate limiting middleware.
///
/// Adds `x-ratelimit-limit` and `x-ratelimit-remaining` to admitted
/// responses; a denied request gets a 429 carrying `retry-after` as well.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    key_extractor: KeyExtractor,
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug)]
pub struct RateLimitBuilder {
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    key_extractor: KeyExtractor,
}

impl RateLimitBuilder {
    /// Uses IP address as the rate limit key.
    #[must_use]
    pub fn per_ip(mut self) -> Self {
        self.key_extractor = KeyExtractor::Ip;
        self
    }

    /// Uses a header value as the rate limit key.
    #[must_use]
    pub fn per_header(mut self, header_name: impl Into<String>) -> Self {
        self.key_extractor = KeyExtractor::Header(header_name.into().to_ascii_lowercase());
        self
    }

    /// Uses a global rate limit.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.key_extractor = KeyExtractor::Global;
        self
    }

    /// Sets the key extractor.
    #[must_use]
    pub fn key_extractor(mut self, key_extractor: KeyExtractor) -> Self {
        self.key_extractor = key_extractor;
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        RateLimitMiddleware {
            limiter: self.limiter,
            clock: self.clock,
            key_extractor: self.key_extractor,
        }
    }
}

impl RateLimitMiddleware {
    /// Creates a per-IP rate limit middleware.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>) -> Self {
        Self::builder(limiter, clock).build()
    }

    /// Creates a rate limit builder.
    #[must_use]
    pub fn builder(limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>) -> RateLimitBuilder {
        RateLimitBuilder {
            limiter,
            clock,
            key_extractor: KeyExtractor::default(),
        }
    }

    /// Returns the key extractor.
    #[must_use]
    pub fn key_extractor(&self) -> &KeyExtractor {
        &self.key_extractor
    }

    fn ip_key(ctx: &MiddlewareContext) -> String {
        ctx.client_ip()
            .map_or_else(|| UNKNOWN_CLIENT_KEY.to_string(), |ip| ip.to_string())
    }

    /// Returns the bucket key for `request` and, in header mode, the nested
    /// header bucket key.
    fn extract_keys(&self, request: &Request, ctx: &MiddlewareContext) -> (String, Option<String>) {
        match &self.key_extractor {
            KeyExtractor::Ip => (Self::ip_key(ctx), None),
            KeyExtractor::Header(name) => {
                let nested = request
                    .headers()
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{name}:{v}"));
                (Self::ip_key(ctx), nested)
            }
            KeyExtractor::Global => (GLOBAL_KEY.to_string(), None),
        }
    }

    /// Charges the outer bucket, then the nested one if the outer admits.
    ///
    /// An admitted request reports the tighter of the two budgets.
    fn admit(&self, outer: &str, nested: Option<&str>) -> Admission {
        let now = self.clock.now();
        let outer = self.limiter.check(outer, now);
        let Some(nested) = nested.filter(|_| outer.allowed) else {
            return outer;
        };

        let inner = self.limiter.check(nested, now);
        if !inner.allowed || inner.remaining < outer.remaining {
            inner
        } else {
            outer
        }
    }

    fn add_rate_limit_headers(&self, response: &mut Response, admission: &Admission) {
        let headers = response.headers_mut();
        headers.insert(
            headers::LIMIT,
            HeaderValue::from(self.limiter.config().capacity),
        );
        headers.insert(headers::REMAINING, HeaderValue::from(admission.remaining));
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "admission"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let (outer, nested) = self.extract_keys(&request, ctx);
            let admission = self.admit(&outer, nested.as_deref());

            if admission.allowed {
                metrics::counter!("accessmesh_admission_total", "result" => "allowed").increment(1);
                ctx.set_extension(admission);
                let mut response = next.run(ctx, request).await;
                self.add_rate_limit_headers(&mut response, &admission);
                return response;
            }

            metrics::counter!("accessmesh_admission_total", "result" => "denied").increment(1);
            let retry_after = admission.retry_after_secs();
            debug!(
                request_id = %ctx.request_id(),
                retry_after,
                "admission denied"
            );

            let mut response = Response::access_error(&AccessError::admission_denied(retry_after));
            self.add_rate_limit_headers(&mut response, &admission);
            response
                .headers_mut()
                .insert(headers::RESET_AFTER, HeaderValue::from(retry_after));
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimiterConfig;
    use accessmesh_core::ManualClock;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use http::{Method, Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    fn limiter(capacity: u32) -> Arc<RateLimiter> {
        Arc::new(
            RateLimiter::new(LimiterConfig {
                capacity,
                refill_per_second: 1.0,
                idle_timeout: Duration::from_secs(600),
            })
            .unwrap(),
        )
    }

    fn create_test_request() -> Request {
        HttpRequest::builder()
            .method(Method::GET)
            .uri("/api/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn create_test_request_with_header(name: &str, value: &str) -> Request {
        HttpRequest::builder()
            .method(Method::GET)
            .uri("/api/test")
            .header(name, value)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ctx_from(ip: [u8; 4]) -> MiddlewareContext {
        MiddlewareContext::new().with_client_ip(IpAddr::V4(Ipv4Addr::from(ip)))
    }

    fn ok_handler() -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> {
        |_ctx, _req| {
            Box::pin(async {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            })
        }
    }

    #[test]
    fn test_builder_key_extractors() {
        let clock: Arc<dyn Clock> = Arc::new(clock());
        let mw = RateLimitMiddleware::new(limiter(1), clock.clone());
        assert_eq!(mw.key_extractor(), &KeyExtractor::Ip);

        let mw = RateLimitMiddleware::builder(limiter(1), clock.clone())
            .per_header("X-Api-Key")
            .build();
        assert_eq!(mw.key_extractor(), &KeyExtractor::Header("x-api-key".to_string()));

        let mw = RateLimitMiddleware::builder(limiter(1), clock).global().build();
        assert_eq!(mw.key_extractor(), &KeyExtractor::Global);
    }

    #[test]
    fn test_extract_keys() {
        let clock: Arc<dyn Clock> = Arc::new(clock());
        let by_ip = RateLimitMiddleware::new(limiter(1), clock.clone());
        assert_eq!(
            by_ip.extract_keys(&create_test_request(), &ctx_from([10, 0, 0, 1])),
            ("10.0.0.1".to_string(), None)
        );
        assert_eq!(
            by_ip.extract_keys(&create_test_request(), &MiddlewareContext::new()),
            (UNKNOWN_CLIENT_KEY.to_string(), None)
        );

        let by_header = RateLimitMiddleware::builder(limiter(1), clock.clone())
            .per_header("x-api-key")
            .build();
        assert_eq!(
            by_header.extract_keys(
                &create_test_request_with_header("x-api-key", "k1"),
                &ctx_from([10, 0, 0, 1])
            ),
            ("10.0.0.1".to_string(), Some("x-api-key:k1".to_string()))
        );
        assert_eq!(
            by_header.extract_keys(&create_test_request(), &ctx_from([10, 0, 0, 1])),
            ("10.0.0.1".to_string(), None)
        );

        let global = RateLimitMiddleware::builder(limiter(1), clock).global().build();
        assert_eq!(
            global.extract_keys(&create_test_request(), &ctx_from([10, 0, 0, 1])),
            (GLOBAL_KEY.to_string(), None)
        );
    }

    #[tokio::test]
    async fn test_rotating_header_values_share_ip_budget() {
        let limiter = limiter(3);
        let mw = RateLimitMiddleware::builder(Arc::clone(&limiter), Arc::new(clock()))
            .per_header("x-api-key")
            .build();

        let mut admitted = 0;
        for i in 0..50 {
            let mut ctx = ctx_from([10, 0, 0, 1]);
            let request = create_test_request_with_header("x-api-key", &format!("key-{i}"));
            let response = mw.process(&mut ctx, request, Next::handler(ok_handler())).await;
            if response.status() == StatusCode::OK {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        // One IP bucket plus one bucket per admitted header value.
        assert_eq!(limiter.len(), 4);
    }

    #[tokio::test]
    async fn test_header_budget_spans_addresses() {
        let mw = RateLimitMiddleware::builder(limiter(2), Arc::new(clock()))
            .per_header("x-api-key")
            .build();

        let mut statuses = Vec::new();
        for last in 1..=3 {
            let mut ctx = ctx_from([10, 0, 0, last]);
            let request = create_test_request_with_header("x-api-key", "shared");
            let response = mw.process(&mut ctx, request, Next::handler(ok_handler())).await;
            statuses.push(response.status());
        }

        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
    }

    #[tokio::test]
    async fn test_admits_then_rejects() {
        let clock = clock();
        let mw = RateLimitMiddleware::new(limiter(2), Arc::new(clock.clone()));

        for remaining in ["1", "0"] {
            let mut ctx = ctx_from([10, 0, 0, 1]);
            let response = mw
                .process(&mut ctx, create_test_request(), Next::handler(ok_handler()))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(headers::LIMIT).unwrap(), "2");
            assert_eq!(response.headers().get(headers::REMAINING).unwrap(), remaining);
        }

        let mut ctx = ctx_from([10, 0, 0, 1]);
        let response = mw
            .process(&mut ctx, create_test_request(), Next::handler(ok_handler()))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(headers::RETRY_AFTER).unwrap(), "1");
        assert_eq!(response.headers().get(headers::RESET_AFTER).unwrap(), "1");
        assert_eq!(response.headers().get(headers::REMAINING).unwrap(), "0");

        // Another client is unaffected.
        let mut other = ctx_from([10, 0, 0, 2]);
        let response = mw
            .process(&mut other, create_test_request(), Next::handler(ok_handler()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // And the first client recovers after a refill.
        clock.advance(chrono::Duration::seconds(1));
        let mut ctx = ctx_from([10, 0, 0, 1]);
        let response = mw
            .process(&mut ctx, create_test_request(), Next::handler(ok_handler()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejection_does_not_reach_handler() {
        let mw = RateLimitMiddleware::new(limiter(1), Arc::new(clock()));
        let mut ctx = ctx_from([10, 0, 0, 1]);
        mw.process(&mut ctx, create_test_request(), Next::handler(ok_handler()))
            .await;

        let reached = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&reached);
        let mut ctx = ctx_from([10, 0, 0, 1]);
        let response = mw
            .process(
                &mut ctx,
                create_test_request(),
                Next::handler(move |_ctx, _req| {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    Box::pin(async {
                        HttpResponse::builder()
                            .status(StatusCode::OK)
                            .body(Full::new(Bytes::new()))
                            .unwrap()
                    })
                }),
            )
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(!reached.load(std::sync::atomic::Ordering::SeqCst));
    }
}

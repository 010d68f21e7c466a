//! Request ID middleware.
//!
//! Assigns every request a UUID v7 identifier used to correlate the gateway's
//! log lines, the upstream request and the client's response.
//!
//! ## Request ID Sources
//!
//! 1. **X-Request-ID header**: used only when incoming IDs are trusted and the
//!    value is a valid UUID
//! 2. **Generated UUID v7**: otherwise
//!
//! The middleware always sets the `X-Request-ID` header on the response,
//! including failure responses from later stages.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use accessmesh_core::RequestId;
use http::HeaderValue;
use uuid::Uuid;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that generates or extracts request IDs.
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Whether to trust incoming request ID headers.
    ///
    /// Should be `false` for traffic arriving straight from clients.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Creates a middleware that always generates fresh IDs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that trusts incoming `X-Request-ID` headers.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(RequestId::from_uuid)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            ctx.set_request_id(request_id);

            let mut response = next.run(ctx, request).await;

            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;

    fn create_test_request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn create_request_with_id(request_id: &str) -> Request {
        HttpRequest::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, request_id)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn create_handler(
        status: StatusCode,
    ) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> {
        move |_ctx, _req| {
            Box::pin(async move {
                HttpResponse::builder()
                    .status(status)
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            })
        }
    }

    fn header_id(response: &Response) -> String {
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let next = Next::handler(create_handler(StatusCode::OK));
        let response = middleware.process(&mut ctx, create_test_request(), next).await;

        assert_eq!(ctx.request_id().to_string(), header_id(&response));
    }

    #[tokio::test]
    async fn test_header_set_on_failure_responses() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let next = Next::handler(create_handler(StatusCode::FORBIDDEN));
        let response = middleware.process(&mut ctx, create_test_request(), next).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(Uuid::parse_str(&header_id(&response)).is_ok());
    }

    #[tokio::test]
    async fn test_ignores_incoming_id_when_not_trusted() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let next = Next::handler(create_handler(StatusCode::OK));
        let response = middleware
            .process(&mut ctx, create_request_with_id(incoming_id), next)
            .await;

        assert_ne!(header_id(&response), incoming_id);
    }

    #[tokio::test]
    async fn test_uses_incoming_id_when_trusted() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let next = Next::handler(create_handler(StatusCode::OK));
        let response = middleware
            .process(&mut ctx, create_request_with_id(incoming_id), next)
            .await;

        assert_eq!(header_id(&response), incoming_id);
        assert_eq!(ctx.request_id().to_string(), incoming_id);
    }

    #[tokio::test]
    async fn test_ignores_invalid_incoming_id() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();

        let next = Next::handler(create_handler(StatusCode::OK));
        let response = middleware
            .process(&mut ctx, create_request_with_id("not-a-valid-uuid"), next)
            .await;

        let id = header_id(&response);
        assert_ne!(id, "not-a-valid-uuid");
        assert!(Uuid::parse_str(&id).is_ok());
    }
}

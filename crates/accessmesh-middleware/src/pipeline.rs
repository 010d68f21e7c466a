//! Fixed-order middleware pipeline.
//!
//! Every request flows through four mandatory stages in a fixed order:
//!
//! 1. **Request ID** - Generate or propagate the request ID (UUID v7)
//! 2. **Admission** - Token-bucket rate limiting per client
//! 3. **Authentication** - Verify the bearer session token
//! 4. **Authorization** - Enforce policies for the authenticated role
//!
//! The first stage that fails terminates the request with its own failure
//! response. Admission runs before authentication so unauthenticated floods
//! are throttled before any signature work.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;
use thiserror::Error;

/// A type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Error building a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A mandatory stage was not provided.
    #[error("pipeline stage '{}' is missing", .0.name())]
    MissingStage(Stage),
}

/// The fixed-order middleware pipeline.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .request_id(RequestIdMiddleware::new())
///     .admission(RateLimitMiddleware::new(limiter, clock.clone()))
///     .authentication(AuthenticationMiddleware::new(verifier, clock.clone()))
///     .authorization(AuthorizationMiddleware::new(engine, store, clock))
///     .build()?;
///
/// let response = pipeline.process(ctx, request, handler).await;
/// ```
pub struct Pipeline {
    stages: [BoxedMiddleware; 4],
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through every stage, then the handler.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all middleware stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Stages are slotted by role, so the order they are supplied in does not
/// matter.
#[derive(Default)]
pub struct PipelineBuilder {
    request_id: Option<BoxedMiddleware>,
    admission: Option<BoxedMiddleware>,
    authentication: Option<BoxedMiddleware>,
    authorization: Option<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request ID stage.
    #[must_use]
    pub fn request_id<M: Middleware>(mut self, middleware: M) -> Self {
        self.request_id = Some(Arc::new(middleware));
        self
    }

    /// Sets the admission (rate limit) stage.
    #[must_use]
    pub fn admission<M: Middleware>(mut self, middleware: M) -> Self {
        self.admission = Some(Arc::new(middleware));
        self
    }

    /// Sets the authentication stage.
    #[must_use]
    pub fn authentication<M: Middleware>(mut self, middleware: M) -> Self {
        self.authentication = Some(Arc::new(middleware));
        self
    }

    /// Sets the authorization stage.
    #[must_use]
    pub fn authorization<M: Middleware>(mut self, middleware: M) -> Self {
        self.authorization = Some(Arc::new(middleware));
        self
    }

    /// Builds the pipeline. Every stage is mandatory.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let request_id = self
            .request_id
            .ok_or(PipelineError::MissingStage(Stage::RequestId))?;
        let admission = self
            .admission
            .ok_or(PipelineError::MissingStage(Stage::Admission))?;
        let authentication = self
            .authentication
            .ok_or(PipelineError::MissingStage(Stage::Authentication))?;
        let authorization = self
            .authorization
            .ok_or(PipelineError::MissingStage(Stage::Authorization))?;

        Ok(Pipeline {
            stages: [request_id, admission, authentication, authorization],
        })
    }
}

/// Middleware stage marker.
///
/// This enum represents the fixed order of middleware stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: Request ID generation/propagation
    RequestId = 1,
    /// Stage 2: Rate limiting
    Admission = 2,
    /// Stage 3: Session token verification
    Authentication = 3,
    /// Stage 4: Policy enforcement
    Authorization = 4,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestId => "request_id",
            Self::Admission => "admission",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 4] {
        [
            Self::RequestId,
            Self::Admission,
            Self::Authentication,
            Self::Authorization,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use std::sync::Mutex;

    /// Records its invocation order.
    struct Recording {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        pass: bool,
    }

    impl Middleware for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.order.lock().unwrap().push(self.name);
                if self.pass {
                    next.run(ctx, request).await
                } else {
                    HttpResponse::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(Full::new(Bytes::new()))
                        .unwrap()
                }
            })
        }
    }

    fn recording(
        name: &'static str,
        order: &Arc<Mutex<Vec<&'static str>>>,
        pass: bool,
    ) -> Recording {
        Recording {
            name,
            order: Arc::clone(order),
            pass,
        }
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn handler(
        order: &Arc<Mutex<Vec<&'static str>>>,
    ) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static
    {
        let order = Arc::clone(order);
        move |_ctx, _req| {
            order.lock().unwrap().push("handler");
            Box::pin(async {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("OK")))
                    .unwrap()
            })
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_fixed_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        // Supplied out of order on purpose.
        let pipeline = Pipeline::builder()
            .authorization(recording("authorization", &order, true))
            .request_id(recording("request_id", &order, true))
            .authentication(recording("authentication", &order, true))
            .admission(recording("admission", &order, true))
            .build()
            .unwrap();

        let response = pipeline
            .process(MiddlewareContext::new(), request(), handler(&order))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["request_id", "admission", "authentication", "authorization", "handler"]
        );
        assert_eq!(
            pipeline.stage_names(),
            vec!["request_id", "admission", "authentication", "authorization"]
        );
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .request_id(recording("request_id", &order, true))
            .admission(recording("admission", &order, false))
            .authentication(recording("authentication", &order, true))
            .authorization(recording("authorization", &order, true))
            .build()
            .unwrap();

        let response = pipeline
            .process(MiddlewareContext::new(), request(), handler(&order))
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(*order.lock().unwrap(), vec!["request_id", "admission"]);
    }

    #[test]
    fn test_missing_stage_is_rejected() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder()
            .request_id(recording("request_id", &order, true))
            .admission(recording("admission", &order, true))
            .authorization(recording("authorization", &order, true))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::MissingStage(Stage::Authentication));
        assert_eq!(err.to_string(), "pipeline stage 'authentication' is missing");
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::RequestId < Stage::Admission);
        assert!(Stage::Admission < Stage::Authentication);
        assert!(Stage::Authentication < Stage::Authorization);
        assert_eq!(Stage::all().map(Stage::name), [
            "request_id",
            "admission",
            "authentication",
            "authorization"
        ]);
    }
}

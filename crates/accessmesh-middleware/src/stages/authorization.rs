//! Authorization middleware stage.
//!
//! Decides the request against the current policy snapshot:
//!
//! ```text
//! Request → RequestId → Admission → Authentication → [Authorization] → downstream
//! ```
//!
//! The role comes from the claims placed in the context by the
//! authentication stage, never from the raw credential. The resource is the
//! request path; the action is derived from the method by an
//! [`ActionMapping`].
//!
//! A store that cannot produce a snapshot fails the request closed with 500.

use std::borrow::Cow;
use std::sync::Arc;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use accessmesh_authz::{AccessRequest, Enforcer, PolicyStore};
use accessmesh_core::{AccessError, Clock, CredentialError, Decision};
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// How request methods become policy actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMapping {
    /// `GET`/`HEAD`/`OPTIONS` → `read`, `POST` → `create`,
    /// `PUT`/`PATCH` → `update`, `DELETE` → `delete`.
    #[default]
    Crud,
    /// The upper-case method name itself, e.g. `GET`.
    Method,
}

impl ActionMapping {
    /// Returns the action for `method`, or `None` if the mapping has none.
    pub fn action_for(self, method: &Method) -> Option<Cow<'static, str>> {
        match self {
            Self::Crud => {
                let action = match *method {
                    Method::GET | Method::HEAD | Method::OPTIONS => "read",
                    Method::POST => "create",
                    Method::PUT | Method::PATCH => "update",
                    Method::DELETE => "delete",
                    _ => return None,
                };
                Some(Cow::Borrowed(action))
            }
            Self::Method => Some(Cow::Owned(method.as_str().to_string())),
        }
    }
}

/// Authorization decision stored in context for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationResult(pub Decision);

/// Middleware that enforces policies.
#[derive(Debug, Clone)]
pub struct AuthorizationMiddleware {
    enforcer: Arc<dyn Enforcer>,
    store: Arc<dyn PolicyStore>,
    clock: Arc<dyn Clock>,
    mapping: ActionMapping,
}

impl AuthorizationMiddleware {
    /// Creates an authorization middleware using the CRUD action mapping.
    #[must_use]
    pub fn new(
        enforcer: Arc<dyn Enforcer>,
        store: Arc<dyn PolicyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enforcer,
            store,
            clock,
            mapping: ActionMapping::default(),
        }
    }

    /// Sets the action mapping.
    #[must_use]
    pub fn with_action_mapping(mut self, mapping: ActionMapping) -> Self {
        self.mapping = mapping;
        self
    }

    fn authorize(&self, ctx: &MiddlewareContext, request: &Request) -> Result<Decision, AccessError> {
        // The authentication stage always runs first; no claims means no session.
        let role = ctx.role().ok_or(CredentialError::Missing)?;

        let snapshot = self.store.snapshot().map_err(|e| {
            error!(request_id = %ctx.request_id(), error = %e, "policy snapshot unavailable");
            AccessError::evaluation_fault(e.to_string())
        })?;

        let Some(action) = self.mapping.action_for(request.method()) else {
            debug!(method = %request.method(), "method has no mapped action");
            return Err(AccessError::AccessDenied);
        };

        let source_ip = ctx.client_ip_string();
        let access = AccessRequest {
            role,
            resource: request.uri().path(),
            action: &action,
            source_ip: &source_ip,
            at: self.clock.now(),
        };
        Ok(self.enforcer.enforce(&access, &snapshot))
    }
}

impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let decision = match self.authorize(ctx, &request) {
                Ok(decision) => decision,
                Err(err) => {
                    let result = match err {
                        AccessError::PolicyEvaluationFault { .. } => "fault",
                        _ => "denied",
                    };
                    metrics::counter!("accessmesh_decisions_total", "result" => result)
                        .increment(1);
                    return Response::access_error(&err);
                }
            };

            ctx.set_extension(AuthorizationResult(decision));

            if decision.allowed {
                metrics::counter!("accessmesh_decisions_total", "result" => "allowed").increment(1);
                return next.run(ctx, request).await;
            }

            metrics::counter!("accessmesh_decisions_total", "result" => "denied").increment(1);
            debug!(
                request_id = %ctx.request_id(),
                role = ctx.role().unwrap_or_default(),
                method = %request.method(),
                path = request.uri().path(),
                reason = decision.reason.as_str(),
                "access denied"
            );
            Response::access_error(&AccessError::AccessDenied)
        })
    }
}

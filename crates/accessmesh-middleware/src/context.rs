//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries per-request state through the pipeline.
//! Each stage writes only the part it owns: the request-id stage sets the
//! request id, the authentication stage sets the [`Claims`]. The client
//! address is resolved by the server before the pipeline runs.

use accessmesh_core::{Claims, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use accessmesh_middleware::context::MiddlewareContext;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let ctx = MiddlewareContext::new().with_client_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 3, 4)));
/// assert_eq!(ctx.client_ip_string(), "10.0.3.4");
/// assert!(ctx.claims().is_none());
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// Resolved client address, if known.
    client_ip: Option<IpAddr>,

    /// Verified session claims, set by the authentication stage.
    claims: Option<Claims>,

    /// When the request started processing.
    started_at: Instant,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            client_ip: None,
            claims: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Sets the resolved client address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip.to_canonical());
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sets the request ID.
    ///
    /// This should only be called by the RequestId middleware.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the client address, if known.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Returns the client address as text, or an empty string if unknown.
    ///
    /// An empty address never satisfies an IP condition.
    #[must_use]
    pub fn client_ip_string(&self) -> String {
        self.client_ip.map(|ip| ip.to_string()).unwrap_or_default()
    }

    /// Returns the verified claims, if authentication has passed.
    #[must_use]
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    /// Returns the authenticated role, if any.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.role.as_str())
    }

    /// Sets the verified claims.
    ///
    /// This should only be called by the Authentication middleware.
    pub fn set_claims(&mut self, claims: Claims) {
        self.claims = Some(claims);
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::net::Ipv6Addr;

    #[test]
    fn test_new_context_is_unauthenticated() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.claims().is_none());
        assert!(ctx.role().is_none());
        assert_eq!(ctx.client_ip_string(), "");
    }

    #[test]
    fn test_set_claims() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_claims(Claims::issue("manager", Utc::now(), Duration::hours(1)));
        assert_eq!(ctx.role(), Some("manager"));
    }

    #[test]
    fn test_mapped_client_ip_is_canonical() {
        let mapped = IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0304));
        let ctx = MiddlewareContext::new().with_client_ip(mapped);
        assert_eq!(ctx.client_ip_string(), "10.0.3.4");
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct Marker(u32);

        let mut ctx = MiddlewareContext::new();
        assert!(ctx.get_extension::<Marker>().is_none());

        ctx.set_extension(Marker(42));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(42)));

        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(42)));
        assert!(ctx.get_extension::<Marker>().is_none());
    }

    #[test]
    fn test_elapsed_time() {
        let ctx = MiddlewareContext::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(ctx.elapsed() >= std::time::Duration::from_millis(10));
    }
}

//! HTTP server.
//!
//! Accepts connections, canonicalises the request path, answers the internal
//! health endpoints, buffers the request body, resolves the client address and
//! runs the access pipeline. Requests that pass every stage go to the
//! configured [`Downstream`] with the same canonical path the policies saw.

use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use accessmesh_config::ServerConfig;
use accessmesh_middleware::{MiddlewareContext, Pipeline, Request, Response, ResponseExt};
use accessmesh_telemetry::{record_request, InFlightGuard};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthChecker, HEALTH_PATH, READY_PATH};
use crate::path::normalize_uri;
use crate::proxy::{Downstream, Forwarded};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Header consulted for the client address when forwarded headers are trusted.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Listener and request handling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address.
    pub addr: String,
    /// How long to wait for open connections on shutdown.
    pub shutdown_timeout: Duration,
    /// Limit on body collection and on the pipeline plus downstream.
    pub request_timeout: Duration,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Connections beyond this are closed on accept.
    pub max_connections: usize,
    /// Whether `x-forwarded-for` names the client.
    pub trust_forwarded_headers: bool,
    /// Trusted proxies appending to `x-forwarded-for`.
    pub trusted_proxy_hops: usize,
}

impl From<&ServerConfig> for ServerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            addr: config.http_addr.clone(),
            shutdown_timeout: config.shutdown_timeout(),
            request_timeout: config.request_timeout(),
            max_body_bytes: config.max_body_bytes,
            max_connections: config.max_connections,
            trust_forwarded_headers: config.trust_forwarded_headers,
            trusted_proxy_hops: config.trusted_proxy_hops,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// The gateway server.
pub struct Gateway {
    settings: ServerSettings,
    pipeline: Arc<Pipeline>,
    downstream: Arc<dyn Downstream>,
    health: Arc<HealthChecker>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("settings", &self.settings)
            .field("pipeline", &self.pipeline)
            .field("downstream", &self.downstream)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a gateway.
    pub fn new(
        settings: ServerSettings,
        pipeline: Pipeline,
        downstream: Arc<dyn Downstream>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            settings,
            pipeline: Arc::new(pipeline),
            downstream,
            health,
        }
    }

    /// Server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Health checker shared with the internal endpoints.
    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> GatewayResult<TcpListener> {
        let addr: SocketAddr = self
            .settings
            .addr
            .parse()
            .map_err(|e| GatewayError::bind(&self.settings.addr, format!("invalid address: {e}")))?;

        TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::bind(&self.settings.addr, e.to_string()))
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(self) -> GatewayResult<()> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds and runs until `shutdown` is triggered.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` is triggered, then
    /// waits up to the shutdown timeout for open connections to finish.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "gateway listening");

        let gateway = Arc::new(self);
        let tracker = ConnectionTracker::new();
        let permits = Arc::new(Semaphore::new(gateway.settings.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        warn!(peer = %peer, "connection limit reached, closing connection");
                        continue;
                    };

                    let gateway = Arc::clone(&gateway);
                    let token = tracker.acquire();
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        if let Err(e) = gateway.serve_connection(stream, peer, shutdown).await {
                            debug!(peer = %peer, error = %e, "connection error");
                        }
                        drop(permit);
                        drop(token);
                    });
                }

                () = shutdown.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        gateway.health.set_draining();

        let timeout = gateway.settings.shutdown_timeout;
        info!(
            timeout_secs = timeout.as_secs(),
            active = tracker.active_connections(),
            "waiting for open connections"
        );

        tokio::select! {
            () = tracker.wait_for_shutdown() => info!("all connections closed"),
            () = tokio::time::sleep(timeout) => warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            ),
        }

        info!("gateway stopped");
        Ok(())
    }

    async fn serve_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(self);

        let service = service_fn(move |request: http::Request<Incoming>| {
            let gateway = Arc::clone(&gateway);
            async move { Ok::<_, Infallible>(gateway.handle(request, peer).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    /// Handles one request from `peer`.
    ///
    /// The path is canonicalised first; a target that cannot be (one climbing
    /// above the root or hiding an encoded separator) is answered with 400.
    pub async fn handle<B>(&self, mut request: http::Request<B>, peer: SocketAddr) -> Response
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let _in_flight = InFlightGuard::new();

        let Some(uri) = normalize_uri(request.uri()) else {
            debug!(target_uri = %request.uri(), "rejecting non-canonical request target");
            record_request(StatusCode::BAD_REQUEST.as_u16(), started.elapsed());
            return Response::json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Invalid request path");
        };
        *request.uri_mut() = uri;

        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if let Some(response) = self.internal_endpoint(&method, &path) {
            return response;
        }

        let client_ip = resolve_client_ip(
            request.headers(),
            peer,
            self.settings.trust_forwarded_headers.then_some(self.settings.trusted_proxy_hops),
        );
        let span = tracing::info_span!("request", method = %method, path = %path, client_ip = %client_ip);

        async move {
            let response = match self.buffer(request).await {
                Ok(request) => self.dispatch(request, client_ip).await,
                Err(response) => response,
            };

            let status = response.status();
            let elapsed = started.elapsed();
            record_request(status.as_u16(), elapsed);
            info!(
                status = status.as_u16(),
                duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );
            response
        }
        .instrument(span)
        .await
    }

    fn internal_endpoint(&self, method: &Method, path: &str) -> Option<Response> {
        if method != Method::GET {
            return None;
        }
        match path {
            HEALTH_PATH => {
                let report = self.health.liveness();
                Some(json_response(StatusCode::OK, &report))
            }
            READY_PATH => {
                let report = self.health.readiness();
                let status = if report.status.is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Some(json_response(status, &report))
            }
            _ => None,
        }
    }

    async fn buffer<B>(&self, request: http::Request<B>) -> Result<Request, Response>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let limit = u64::try_from(self.settings.max_body_bytes).unwrap_or(u64::MAX);
        if let Some(declared) = declared.filter(|&len| len > limit) {
            debug!(declared, limit, "declared request body too large");
            return Err(payload_too_large());
        }

        let limited = Limited::new(body, self.settings.max_body_bytes);

        match tokio::time::timeout(self.settings.request_timeout, limited.collect()).await {
            Ok(Ok(collected)) => Ok(http::Request::from_parts(
                parts,
                Full::new(collected.to_bytes()),
            )),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(limit = self.settings.max_body_bytes, "request body too large");
                Err(payload_too_large())
            }
            Ok(Err(e)) => {
                debug!(error = %e, "failed to read request body");
                Err(Response::json_error(
                    StatusCode::BAD_REQUEST,
                    "BAD_REQUEST",
                    "Failed to read request body",
                ))
            }
            Err(_) => {
                warn!("request body collection timed out");
                Err(Response::json_error(
                    StatusCode::REQUEST_TIMEOUT,
                    "REQUEST_TIMEOUT",
                    "Request body collection timed out",
                ))
            }
        }
    }

    async fn dispatch(&self, request: Request, client_ip: IpAddr) -> Response {
        let ctx = MiddlewareContext::new().with_client_ip(client_ip);
        let downstream = Arc::clone(&self.downstream);

        let handler = move |ctx: &mut MiddlewareContext, request: Request| {
            let forwarded = Forwarded {
                request_id: ctx.request_id(),
                role: ctx.role().map(str::to_string),
            };
            downstream.forward(forwarded, request)
        };

        match tokio::time::timeout(
            self.settings.request_timeout,
            self.pipeline.process(ctx, request, handler),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                warn!("request timed out");
                Response::json_error(
                    StatusCode::GATEWAY_TIMEOUT,
                    "GATEWAY_TIMEOUT",
                    "Request timed out",
                )
            }
        }
    }
}

/// Picks the client address.
///
/// With `trusted_hops` set, each trusted proxy is assumed to append the
/// address it saw to `x-forwarded-for`, so the client is the entry that many
/// places from the right; entries further left are client-supplied and
/// ignored. Multiple header lines are read as one list. When the list is too
/// short or the entry does not parse, the TCP peer is used.
pub fn resolve_client_ip(headers: &HeaderMap, peer: SocketAddr, trusted_hops: Option<usize>) -> IpAddr {
    let Some(hops) = trusted_hops.filter(|&hops| hops > 0) else {
        return peer.ip();
    };

    let entries: Vec<&str> = headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect();

    entries
        .len()
        .checked_sub(hops)
        .and_then(|index| entries.get(index))
        .and_then(|entry| entry.parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

fn payload_too_large() -> Response {
    Response::json_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        "PAYLOAD_TOO_LARGE",
        "Request body too large",
    )
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_value(body) {
        Ok(value) => Response::json(status, &value),
        Err(e) => {
            error!(error = %e, "failed to serialize internal response");
            Response::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal error",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn forwarded(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(FORWARDED_FOR_HEADER, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_client_ip_from_peer() {
        let headers = forwarded(&["10.0.3.4"]);
        assert_eq!(resolve_client_ip(&headers, peer(), None), ip("192.0.2.10"));
        assert_eq!(resolve_client_ip(&headers, peer(), Some(0)), ip("192.0.2.10"));
    }

    #[test]
    fn test_client_ip_counts_trusted_hops_from_right() {
        let headers = forwarded(&["10.0.3.4, 172.16.0.1"]);
        assert_eq!(resolve_client_ip(&headers, peer(), Some(1)), ip("172.16.0.1"));
        assert_eq!(resolve_client_ip(&headers, peer(), Some(2)), ip("10.0.3.4"));
    }

    #[test]
    fn test_spoofed_leftmost_entry_ignored() {
        // The client sent "1.2.3.4"; the trusted proxy appended what it saw.
        let headers = forwarded(&["1.2.3.4, 198.51.100.7"]);
        assert_eq!(resolve_client_ip(&headers, peer(), Some(1)), ip("198.51.100.7"));
    }

    #[test]
    fn test_forwarded_header_lines_joined() {
        let headers = forwarded(&["1.2.3.4", "10.0.3.4, 172.16.0.1"]);
        assert_eq!(resolve_client_ip(&headers, peer(), Some(2)), ip("10.0.3.4"));
        assert_eq!(resolve_client_ip(&headers, peer(), Some(3)), ip("1.2.3.4"));
    }

    #[test]
    fn test_short_or_unparseable_forwarded_header_falls_back_to_peer() {
        let headers = forwarded(&["unknown"]);
        assert_eq!(resolve_client_ip(&headers, peer(), Some(1)), ip("192.0.2.10"));

        let headers = forwarded(&["10.0.3.4"]);
        assert_eq!(resolve_client_ip(&headers, peer(), Some(2)), ip("192.0.2.10"));

        assert_eq!(resolve_client_ip(&HeaderMap::new(), peer(), Some(1)), ip("192.0.2.10"));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ServerSettings::default();
        assert_eq!(settings.addr, "0.0.0.0:8080");
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_body_bytes, 1024 * 1024);
        assert_eq!(settings.trusted_proxy_hops, 1);
    }
}

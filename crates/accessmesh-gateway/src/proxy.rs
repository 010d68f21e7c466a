//! Where allowed requests go.
//!
//! A [`Downstream`] receives every request that passed the pipeline.
//! [`ProxyClient`] forwards it to the configured upstream; [`ForwardAuth`]
//! answers it directly so the gateway can sit behind another proxy's
//! external-auth hook.

use std::fmt;
use std::time::Duration;

use accessmesh_core::RequestId;
use accessmesh_middleware::{BoxFuture, Request, Response, ResponseExt};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use reqwest::Client;
use tracing::{debug, error};

use crate::error::{GatewayError, GatewayResult};

/// Header carrying the authenticated role to the upstream.
pub const ROLE_HEADER: &str = "x-accessmesh-role";

/// Request ID header.
pub const REQUEST_ID_HEADER: &str = accessmesh_middleware::stages::REQUEST_ID_HEADER;

/// Headers never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Identity facts established by the pipeline.
#[derive(Debug, Clone)]
pub struct Forwarded {
    /// Request ID assigned by the pipeline.
    pub request_id: RequestId,
    /// Authenticated role.
    pub role: Option<String>,
}

/// Receives requests that passed every stage.
pub trait Downstream: Send + Sync + fmt::Debug {
    /// Produces the response for an allowed request.
    fn forward(&self, forwarded: Forwarded, request: Request) -> BoxFuture<'static, Response>;
}

/// Reverse proxy to a single upstream base URL.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    upstream_url: String,
    timeout: Duration,
}

impl ProxyClient {
    /// Creates a client for `upstream_url`.
    pub fn new(upstream_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::proxy(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            upstream_url: upstream_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Upstream base URL.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Upstream request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, forwarded: Forwarded, request: Request) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let url = format!("{}{}", self.upstream_url, path);

        let mut headers = filter_headers_for_upstream(&parts.headers);
        add_identity_headers(&mut headers, &forwarded);

        let body = body
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .unwrap_or_default();

        let response = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("request failed: {e}"), e.is_timeout()))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::upstream(format!("failed to read body: {e}"), e.is_timeout()))?;

        let mut out = http::Response::new(Full::new(body));
        *out.status_mut() = status;
        for (name, value) in &response_headers {
            if !is_hop_by_hop_header(name.as_str()) {
                out.headers_mut().append(name.clone(), value.clone());
            }
        }
        Ok(out)
    }
}

impl Downstream for ProxyClient {
    fn forward(&self, forwarded: Forwarded, request: Request) -> BoxFuture<'static, Response> {
        let client = self.clone();
        Box::pin(async move {
            let request_id = forwarded.request_id;
            match client.send(forwarded, request).await {
                Ok(response) => {
                    debug!(request_id = %request_id, status = %response.status(), "upstream responded");
                    response
                }
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "proxy error");
                    let status = e.status_code();
                    let code = if status == StatusCode::GATEWAY_TIMEOUT {
                        "UPSTREAM_TIMEOUT"
                    } else {
                        "BAD_GATEWAY"
                    };
                    Response::json_error(status, code, "Upstream service unavailable")
                }
            }
        })
    }
}

/// Answers allowed requests with `200 OK` and the identity headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardAuth;

impl Downstream for ForwardAuth {
    fn forward(&self, forwarded: Forwarded, _request: Request) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let mut response = http::Response::new(Full::new(Bytes::new()));
            add_identity_headers(response.headers_mut(), &forwarded);
            response
        })
    }
}

/// Copies `headers` minus hop-by-hop headers, `host` and the credential.
pub fn filter_headers_for_upstream(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str)
            || name_str == "host"
            || name_str == "authorization"
            || name_str == ROLE_HEADER
        {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

fn add_identity_headers(headers: &mut HeaderMap, forwarded: &Forwarded) {
    if let Ok(value) = HeaderValue::from_str(&forwarded.request_id.to_string()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    if let Some(role) = forwarded.role.as_deref() {
        if let Ok(value) = HeaderValue::from_str(role) {
            headers.insert(HeaderName::from_static(ROLE_HEADER), value);
        }
    }
}

/// Check if a header is hop-by-hop (should not be forwarded).
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

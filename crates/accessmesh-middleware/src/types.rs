//! Common types used throughout the middleware pipeline.
//!
//! This module re-exports HTTP request and response types used by middleware.

use accessmesh_core::AccessError;
use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building error responses.
pub trait ResponseExt {
    /// Creates a JSON response with the given status and body.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;

    /// Creates a JSON error envelope `{"error":{"code","message"}}`.
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response;

    /// Creates the client-facing response for a pipeline failure.
    ///
    /// Only the generic public message is included.
    fn access_error(error: &AccessError) -> Response;
}

impl ResponseExt for Response {
    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });
        Self::json(status, &body)
    }

    fn access_error(error: &AccessError) -> Response {
        let mut response =
            Self::json_error(error.status_code(), error.code(), error.public_message());
        if let Some(seconds) = error.retry_after_seconds() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmesh_core::CredentialError;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_error_response() {
        let response = Response::json_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Authentication required",
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_access_error_hides_detail() {
        let response = Response::access_error(&AccessError::from(CredentialError::BadSignature));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await.to_string();
        assert!(!body.contains("signature"));
    }

    #[test]
    fn test_admission_error_sets_retry_after() {
        let response = Response::access_error(&AccessError::admission_denied(2));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }
}

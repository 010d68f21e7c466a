//! Request target normalization.
//!
//! Authorization matches policies against the request path, and the proxy
//! forwards that same path upstream. Both must see one canonical form, so
//! dot-segments (plain or percent-encoded) are resolved and empty segments
//! collapsed before the pipeline runs. A target that climbs above the root or
//! hides a separator inside an encoded segment is rejected outright.

use http::uri::{PathAndQuery, Uri};

/// Returns the canonical form of `path`, or `None` if it cannot be accepted.
///
/// ```rust
/// use accessmesh_gateway::path::normalize_path;
///
/// assert_eq!(normalize_path("/api//v1/./orders/").as_deref(), Some("/api/v1/orders/"));
/// assert_eq!(normalize_path("/api/v1/orders/%2e%2e/users").as_deref(), Some("/api/v1/users"));
/// assert_eq!(normalize_path("/api/../../etc"), None);
/// ```
pub fn normalize_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix('/')?;
    let mut segments: Vec<&str> = Vec::new();

    for segment in rest.split('/') {
        if hides_separator(segment) {
            return None;
        }
        match decode_dots(segment).as_str() {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() || path.ends_with('/') {
        normalized.push('/');
    }
    Some(normalized)
}

/// Rewrites the path of `uri` into canonical form, keeping the query.
pub fn normalize_uri(uri: &Uri) -> Option<Uri> {
    let path = normalize_path(uri.path())?;
    if path == uri.path() {
        return Some(uri.clone());
    }

    let target = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(target).ok()?);
    Uri::from_parts(parts).ok()
}

fn decode_dots(segment: &str) -> String {
    segment.replace("%2e", ".").replace("%2E", ".")
}

fn hides_separator(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    segment.contains('\\') || lower.contains("%2f") || lower.contains("%5c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_path_unchanged() {
        assert_eq!(normalize_path("/").as_deref(), Some("/"));
        assert_eq!(normalize_path("/api/v1/orders").as_deref(), Some("/api/v1/orders"));
        assert_eq!(normalize_path("/api/v1/orders/").as_deref(), Some("/api/v1/orders/"));
    }

    #[test]
    fn test_dot_segments_resolved() {
        assert_eq!(
            normalize_path("/api/v1/orders/../../admin/secrets").as_deref(),
            Some("/api/admin/secrets")
        );
        assert_eq!(
            normalize_path("/api/v1/orders/%2e%2e/%2E%2E/admin").as_deref(),
            Some("/api/admin")
        );
        assert_eq!(normalize_path("/api/v1/orders/.%2e/x").as_deref(), Some("/api/v1/x"));
        assert_eq!(normalize_path("/api/./v1/%2e/orders").as_deref(), Some("/api/v1/orders"));
        assert_eq!(normalize_path("/api/..").as_deref(), Some("/"));
    }

    #[test]
    fn test_repeated_slashes_collapsed() {
        assert_eq!(normalize_path("//api///v1//orders").as_deref(), Some("/api/v1/orders"));
    }

    #[test]
    fn test_escaping_root_rejected() {
        assert_eq!(normalize_path("/.."), None);
        assert_eq!(normalize_path("/api/../../admin"), None);
        assert_eq!(normalize_path("/%2e%2e/admin"), None);
    }

    #[test]
    fn test_hidden_separators_rejected() {
        assert_eq!(normalize_path("/api/v1/orders/..%2f..%2fadmin"), None);
        assert_eq!(normalize_path("/api/v1/orders%2F..%2Fadmin"), None);
        assert_eq!(normalize_path("/api/v1/orders/..%5cadmin"), None);
        assert_eq!(normalize_path("/api/v1\\..\\admin"), None);
    }

    #[test]
    fn test_relative_path_rejected() {
        assert_eq!(normalize_path("api/v1"), None);
        assert_eq!(normalize_path("*"), None);
    }

    #[test]
    fn test_other_encodings_kept() {
        assert_eq!(
            normalize_path("/api/v1/orders/a%20b").as_deref(),
            Some("/api/v1/orders/a%20b")
        );
    }

    #[test]
    fn test_uri_keeps_query() {
        let uri: Uri = "/api/v1/orders/../users?page=2&sort=asc".parse().unwrap();
        let normalized = normalize_uri(&uri).unwrap();
        assert_eq!(normalized.path(), "/api/v1/users");
        assert_eq!(normalized.query(), Some("page=2&sort=asc"));

        let absolute: Uri = "http://gateway.local/a/./b".parse().unwrap();
        let normalized = normalize_uri(&absolute).unwrap();
        assert_eq!(normalized.to_string(), "http://gateway.local/a/b");
    }
}

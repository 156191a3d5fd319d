use crate::config::{ImageFormat, DEFAULT_CACHE_MAX_AGE};
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use std::time::Duration;

/// Served images are third-party content: nothing in them may navigate,
/// submit forms or load further resources.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; form-action 'none'; navigate-to 'none'; sandbox";

/// A complete response, as served and as held by the edge tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Lifetime granted by the `cache-control` header, if it grants one.
    pub fn max_age(&self) -> Option<Duration> {
        let value = self.headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
        let mut max_age = None;
        for directive in value.split(',').map(str::trim) {
            let directive = directive.to_ascii_lowercase();
            if directive == "no-store" || directive == "no-cache" || directive == "private" {
                return None;
            }
            if let Some(secs) = directive.strip_prefix("max-age=") {
                max_age = secs.trim().parse::<u64>().ok().map(Duration::from_secs);
            }
        }
        max_age
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Header policy applied to every served image.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    cache_control: HeaderValue,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_AGE)
    }
}

impl ResponsePolicy {
    pub fn new(max_age: u64) -> Self {
        // digits only, always a valid header value
        let cache_control = HeaderValue::from_str(&format!("public, max-age={}", max_age))
            .unwrap_or_else(|_| HeaderValue::from_static("public"));
        Self { cache_control }
    }

    pub fn cache_control_value(&self) -> &HeaderValue {
        &self.cache_control
    }

    pub fn build(&self, bytes: Bytes, format: ImageFormat) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, self.cache_control.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(CONTENT_SECURITY_POLICY));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
        CachedResponse { status: StatusCode::OK, headers, body: bytes }
    }
}

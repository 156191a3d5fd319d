use axum::{
    extract::{OriginalUri, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod pipeline;
pub mod response;
pub mod source;
pub mod transform;

use crate::config::GatewayConfig;
use crate::pipeline::{Gateway, InboundRequest};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Missing src parameter")]
    MissingSource,
    #[error("Invalid src: {0}")]
    InvalidSource(String),
    #[error("Disallowed file extension")]
    DisallowedExtension,
    #[error("Forbidden host: {0}")]
    ForbiddenHost(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Transformation returned an empty result")]
    EmptyUpstreamResult,
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingSource
            | GatewayError::InvalidSource(_)
            | GatewayError::DisallowedExtension => StatusCode::BAD_REQUEST,
            GatewayError::ForbiddenHost(_) => StatusCode::FORBIDDEN,
            // upstream failures are reported as a plain "not found"
            GatewayError::UpstreamUnavailable(_) => StatusCode::NOT_FOUND,
            GatewayError::EmptyUpstreamResult | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            GatewayError::UpstreamUnavailable(_) => "Not Found".to_string(),
            GatewayError::EmptyUpstreamResult => "Internal Server Error".to_string(),
            GatewayError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

/// Rebuilds the caller-facing URL: absolute-form URIs as-is, otherwise
/// `Host` plus path and query. `x-forwarded-proto` picks the scheme.
pub fn request_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{}://{}{}", scheme, host, path)
}

async fn image_handler(
    State(gateway): State<Arc<Gateway>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let url = request_url(&uri, &headers);
    tracing::debug!("Processing image request: {}", url);

    let inbound = InboundRequest::new(url, uri.query(), headers);
    match gateway.handle(&inbound).await {
        Ok(resp) => resp.into_response(),
        Err(e) => {
            METRICS.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Request for {} failed: {}", inbound.url, e);
            e.into_response()
        }
    }
}

// Last line of defence: anything that panicked becomes a 500 carrying the
// panic message.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown error".to_string()
    };
    METRICS.errors.fetch_add(1, Ordering::Relaxed);
    tracing::error!("Request handler panicked: {}", message);
    GatewayError::Internal(message).into_response()
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics tracking
pub struct Metrics {
    pub edge_hits: AtomicU64,
    pub durable_hits: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            edge_hits: AtomicU64::new(0),
            durable_hits: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref METRICS: Metrics = Metrics::new();
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imagegate"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    let metrics = format!(
        "# HELP imagegate_edge_hits_total Requests served from the edge cache\n\
         # TYPE imagegate_edge_hits_total counter\n\
         imagegate_edge_hits_total {}\n\
         # HELP imagegate_durable_hits_total Requests served from the durable store\n\
         # TYPE imagegate_durable_hits_total counter\n\
         imagegate_durable_hits_total {}\n\
         # HELP imagegate_transforms_total Calls made to the transformation service\n\
         # TYPE imagegate_transforms_total counter\n\
         imagegate_transforms_total {}\n\
         # HELP imagegate_errors_total Requests answered with an error\n\
         # TYPE imagegate_errors_total counter\n\
         imagegate_errors_total {}\n",
        METRICS.edge_hits.load(Ordering::Relaxed),
        METRICS.durable_hits.load(Ordering::Relaxed),
        METRICS.transforms.load(Ordering::Relaxed),
        METRICS.errors.load(Ordering::Relaxed),
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))],
        metrics,
    )
}

/// Token refill interval of the per-IP limiter on the image endpoint.
pub const RATE_LIMIT_PERIOD_MS: u64 = 100;
/// Requests a single IP may send back to back.
pub const RATE_LIMIT_BURST: u32 = 30;

/// Builds the HTTP surface: `/health`, `/metrics`, and the image endpoint
/// answering every other path and method.
pub fn router(gateway: Arc<Gateway>, config: &GatewayConfig) -> Router {
    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let mut image_routes = Router::new().fallback(image_handler).with_state(gateway);

    if config.rate_limit {
        // per IP: one token every RATE_LIMIT_PERIOD_MS (10/sec), burst of RATE_LIMIT_BURST.
        // `per_second(n)` would mean one token every n seconds.
        match GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_PERIOD_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
        {
            Some(governor_conf) => {
                tracing::info!(
                    "Router configured with rate limiting: {}/sec, burst {}",
                    1000 / RATE_LIMIT_PERIOD_MS,
                    RATE_LIMIT_BURST
                );
                image_routes = image_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(governor_conf)),
                });
            }
            None => tracing::warn!("Invalid rate limit settings, rate limiting disabled"),
        }
    } else {
        tracing::info!("Rate limiting disabled");
    }

    Router::new()
        .merge(observability_routes)
        .merge(image_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(GatewayError::MissingSource.status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::InvalidSource("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::DisallowedExtension.status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::ForbiddenHost("h".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::UpstreamUnavailable("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::EmptyUpstreamResult.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(GatewayError::Internal("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn request_url_from_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("img.gw.test"));
        let uri: Uri = "/resize?src=abc&w=10".parse().unwrap();
        assert_eq!(request_url(&uri, &headers), "http://img.gw.test/resize?src=abc&w=10");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(request_url(&uri, &headers), "https://img.gw.test/resize?src=abc&w=10");

        let absolute: Uri = "http://other.test/x?src=1".parse().unwrap();
        assert_eq!(request_url(&absolute, &headers), "http://other.test/x?src=1");
    }
}

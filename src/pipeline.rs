use crate::cache::{cache_key, CacheKey, CachedImage, DurableStore, EdgeCache};
use crate::config::GatewayConfig;
use crate::fetch::{TransformCall, Transformer};
use crate::response::{CachedResponse, ResponsePolicy};
use crate::source::validate_source;
use crate::transform::params::{parse_options, QueryParams};
use crate::transform::TransformRequest;
use crate::{GatewayError, METRICS};
use http::{header, HeaderMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// The parts of an inbound HTTP request the pipeline looks at.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Full caller-facing URL; the edge tier key.
    pub url: String,
    pub query: QueryParams,
    pub headers: HeaderMap,
}

impl InboundRequest {
    pub fn new(url: impl Into<String>, query: Option<&str>, headers: HeaderMap) -> Self {
        Self {
            url: url.into(),
            query: QueryParams::parse(query),
            headers,
        }
    }
}

/// Request-resolution pipeline: validation, option derivation, then the
/// edge -> durable -> transformation waterfall.
///
/// Cache write-backs run on a [`TaskTracker`] and never hold up the
/// response; call [`Gateway::shutdown`] to let them finish.
pub struct Gateway {
    edge: Arc<dyn EdgeCache>,
    store: Arc<dyn DurableStore>,
    transformer: Arc<dyn Transformer>,
    policy: ResponsePolicy,
    allowed_hosts: Vec<String>,
    tasks: TaskTracker,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        edge: Arc<dyn EdgeCache>,
        store: Arc<dyn DurableStore>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            edge,
            store,
            transformer,
            policy: ResponsePolicy::new(config.cache_max_age),
            allowed_hosts: config.allowed_hosts.clone(),
            tasks: TaskTracker::new(),
        }
    }

    /// Validates the request and derives everything the waterfall needs.
    pub fn prepare(&self, inbound: &InboundRequest) -> Result<(TransformRequest, CacheKey), GatewayError> {
        let accept = inbound.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        let (options, negotiated) = parse_options(&inbound.query, accept);
        let source = validate_source(inbound.query.get("src"), &self.allowed_hosts)?;

        let request = TransformRequest::new(source, options, negotiated);
        let key = cache_key(request.source_url(), request.options());
        Ok((request, key))
    }

    /// Full pipeline for one inbound request.
    pub async fn handle(&self, inbound: &InboundRequest) -> Result<CachedResponse, GatewayError> {
        let (request, key) = self.prepare(inbound)?;
        self.resolve(inbound, &request, &key).await
    }

    /// Cache waterfall, first hit wins:
    /// 1. edge tier by request URL, served verbatim
    /// 2. durable tier by cache key
    /// 3. transformation service, written back to the durable tier
    ///
    /// Anything not served from the edge is written back to it.
    pub async fn resolve(
        &self,
        inbound: &InboundRequest,
        request: &TransformRequest,
        key: &CacheKey,
    ) -> Result<CachedResponse, GatewayError> {
        match self.edge.lookup(&inbound.url).await {
            Ok(Some(hit)) => {
                tracing::debug!("Edge hit for {}", inbound.url);
                METRICS.edge_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Edge lookup failed for {}: {}", inbound.url, e),
        }

        let stored = match self.store.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("Durable lookup failed for key={}: {}", key, e);
                None
            }
        };

        let bytes = match stored {
            Some(image) => {
                tracing::debug!("Durable hit for key={}", key);
                METRICS.durable_hits.fetch_add(1, Ordering::Relaxed);
                image.bytes
            }
            None => {
                tracing::info!("Cache miss for key={}, transforming {}", key, request.source_url());
                METRICS.transforms.fetch_add(1, Ordering::Relaxed);
                let call = TransformCall {
                    source_url: request.source_url(),
                    headers: &inbound.headers,
                    options: request.options(),
                };
                let bytes = self.transformer.transform(call).await.map_err(|e| {
                    tracing::error!("Transformation of {} failed: {}", request.source_url(), e);
                    e
                })?;
                if bytes.is_empty() {
                    tracing::error!("Transformation of {} returned no data", request.source_url());
                    return Err(GatewayError::EmptyUpstreamResult);
                }
                self.spawn_durable_write(
                    key.clone(),
                    CachedImage { bytes: bytes.clone(), format: request.format() },
                );
                bytes
            }
        };

        let response = self.policy.build(bytes, request.format());
        self.spawn_edge_write(inbound.url.clone(), response.clone());
        Ok(response)
    }

    fn spawn_durable_write(&self, key: CacheKey, image: CachedImage) {
        let store = Arc::clone(&self.store);
        self.tasks.spawn(async move {
            match store.put(&key, image).await {
                Ok(()) => tracing::debug!("Stored key={}", key),
                Err(e) => tracing::warn!("Failed to store key={}: {}", key, e),
            }
        });
    }

    fn spawn_edge_write(&self, url: String, response: CachedResponse) {
        let edge = Arc::clone(&self.edge);
        self.tasks.spawn(async move {
            if let Err(e) = edge.store(&url, response).await {
                tracing::warn!("Failed to populate edge cache for {}: {}", url, e);
            }
        });
    }

    /// Number of cache write-backs still running.
    pub fn pending_writes(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every write-back spawned so far. New requests may still
    /// spawn writes afterwards.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Waits for outstanding write-backs; used on graceful shutdown.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            tracing::info!("Waiting for {} cache writes", self.tasks.len());
        }
        self.tasks.wait().await;
    }
}

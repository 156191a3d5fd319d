use crate::transform::params::TransformOptions;
use crate::GatewayError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::HeaderMap;
use mime::Mime;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// One call to the transformation service.
#[derive(Debug, Clone, Copy)]
pub struct TransformCall<'a> {
    pub source_url: &'a str,
    /// Inbound request headers, forwarded to the service.
    pub headers: &'a HeaderMap,
    pub options: &'a TransformOptions,
}

/// The external service doing the actual pixel work.
///
/// Implementations return the transformed bytes, possibly empty, or
/// [`GatewayError::UpstreamUnavailable`] when the service could not be
/// reached or refused the request.
#[async_trait::async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, call: TransformCall<'_>) -> Result<Bytes, GatewayError>;
}

// Connection-scoped headers plus the ones reqwest must compute itself.
// `accept-encoding` is dropped so the body comes back as raw image bytes.
const NOT_FORWARDED: [&str; 11] = [
    "connection",
    "keep-alive",
    "host",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-authorization",
    "proxy-authenticate",
    "accept-encoding",
];

/// Removes headers that must not travel to the transformation service.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in NOT_FORWARDED {
        forwarded.remove(name);
    }
    forwarded
}

/// HTTP client for a transformation service that takes the source as
/// `url` and each option under its own name:
/// `GET <endpoint>?url=<source>&fit=cover&width=300&format=webp`.
pub struct HttpTransformer {
    client: Client,
    endpoint: Url,
    max_size: usize,
}

impl HttpTransformer {
    pub fn new(endpoint: &str, timeout: Duration, max_size: usize) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| GatewayError::Internal(format!("Invalid transformation endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(Self { client, endpoint, max_size })
    }

    pub fn request_url(&self, call: &TransformCall<'_>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("url", call.source_url);
            for (key, value) in call.options.iter() {
                pairs.append_pair(key.as_str(), value);
            }
        }
        url
    }
}

#[async_trait::async_trait]
impl Transformer for HttpTransformer {
    /// Calls the service and streams the body with a size cap.
    ///
    /// # Errors
    /// [`GatewayError::UpstreamUnavailable`] if:
    /// - the request fails or times out
    /// - the service answers with a non-2xx status
    /// - the service answers with a non-image Content-Type
    /// - the body exceeds the configured size limit
    async fn transform(&self, call: TransformCall<'_>) -> Result<Bytes, GatewayError> {
        let url = self.request_url(&call);
        tracing::debug!("Calling transformation service: {}", url);

        let resp = self
            .client
            .get(url)
            .headers(forwardable_headers(call.headers))
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "Upstream status: {}",
                resp.status()
            )));
        }

        // Unparseable or missing types pass; an explicit non-image type is
        // an error page, not a result.
        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if let Ok(m) = ct.parse::<Mime>() {
            if m.type_() != mime::IMAGE {
                return Err(GatewayError::UpstreamUnavailable(format!(
                    "Upstream returned {}",
                    m
                )));
            }
        }

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_size {
                return Err(GatewayError::UpstreamUnavailable(
                    "Upstream result exceeds size limit".into(),
                ));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(GatewayError::UpstreamUnavailable(
                    "Upstream result exceeds size limit".into(),
                ));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }
}

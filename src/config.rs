use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default `max-age` for served images: 180 days.
pub const DEFAULT_CACHE_MAX_AGE: u64 = 180 * 24 * 60 * 60;
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_UPSTREAM_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_EDGE_CAPACITY: usize = 1024;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    avif,
    webp,
    jpeg,
    png,
    gif,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::avif => "avif",
            ImageFormat::webp => "webp",
            ImageFormat::jpeg => "jpeg",
            ImageFormat::png => "png",
            ImageFormat::gif => "gif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::avif => "image/avif",
            ImageFormat::webp => "image/webp",
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::png => "image/png",
            ImageFormat::gif => "image/gif",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which durable tier backend the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sled,
    Disk,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sled" => Ok(StoreKind::Sled),
            "disk" => Ok(StoreKind::Disk),
            "memory" => Ok(StoreKind::Memory),
            other => Err(ConfigError::UnknownStore(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Source hosts images may be pulled from. Matched exactly against the
    /// decoded `src` hostname.
    pub allowed_hosts: Vec<String>,
    /// Endpoint of the external transformation service.
    pub transform_url: String,
    pub transform_timeout: Duration,
    pub max_upstream_bytes: usize, // bytes
    pub cache_max_age: u64,        // seconds
    pub store: StoreKind,
    pub store_dir: PathBuf,
    pub max_store_size: Option<u64>,
    pub edge_capacity: usize,
    pub rate_limit: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            transform_url: String::new(),
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            max_upstream_bytes: DEFAULT_MAX_UPSTREAM_BYTES,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            store: StoreKind::Sled,
            store_dir: PathBuf::from("./store"),
            max_store_size: None,
            edge_capacity: DEFAULT_EDGE_CAPACITY,
            rate_limit: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one allowed source host is required")] NoAllowedHosts,
    #[error("Transformation service URL is invalid: {0}")] InvalidTransformUrl(String),
    #[error("Unknown store backend: {0}")] UnknownStore(String),
    #[error("Invalid value for {name}: {value}")] InvalidValue { name: &'static str, value: String },
    #[error("Max upstream size must be > 0")] InvalidMaxUpstream,
    #[error("Edge capacity must be > 0")] InvalidEdgeCapacity,
}

impl GatewayConfig {
    /// Reads configuration from `GATEWAY_*` environment variables, falling
    /// back to defaults for everything but the allow-list and the
    /// transformation endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(hosts) = lookup("GATEWAY_ALLOWED_HOSTS") {
            cfg.allowed_hosts = hosts
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(url) = lookup("GATEWAY_TRANSFORM_URL") {
            cfg.transform_url = url.trim().to_string();
        }
        if let Some(v) = lookup("GATEWAY_CACHE_MAX_AGE") {
            cfg.cache_max_age = parse_var("GATEWAY_CACHE_MAX_AGE", &v)?;
        }
        if let Some(v) = lookup("GATEWAY_TRANSFORM_TIMEOUT_SECS") {
            cfg.transform_timeout = Duration::from_secs(parse_var("GATEWAY_TRANSFORM_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("GATEWAY_MAX_UPSTREAM_BYTES") {
            cfg.max_upstream_bytes = parse_var("GATEWAY_MAX_UPSTREAM_BYTES", &v)?;
        }
        if let Some(v) = lookup("GATEWAY_STORE") {
            cfg.store = v.parse()?;
        }
        if let Some(v) = lookup("GATEWAY_STORE_DIR") {
            cfg.store_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GATEWAY_MAX_STORE_BYTES") {
            cfg.max_store_size = Some(parse_var("GATEWAY_MAX_STORE_BYTES", &v)?);
        }
        if let Some(v) = lookup("GATEWAY_EDGE_CAPACITY") {
            cfg.edge_capacity = parse_var("GATEWAY_EDGE_CAPACITY", &v)?;
        }
        cfg.rate_limit = lookup("DISABLE_RATE_LIMIT").is_none();

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_hosts.is_empty() { return Err(ConfigError::NoAllowedHosts); }
        match url::Url::parse(&self.transform_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidTransformUrl(self.transform_url.clone())),
        }
        if self.max_upstream_bytes == 0 { return Err(ConfigError::InvalidMaxUpstream); }
        if self.edge_capacity == 0 { return Err(ConfigError::InvalidEdgeCapacity); }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue { name, value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let cfg = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_ALLOWED_HOSTS", "Images.Example.com, cdn.example.com"),
            ("GATEWAY_TRANSFORM_URL", "http://127.0.0.1:9000/transform"),
        ]))
        .unwrap();

        assert_eq!(cfg.allowed_hosts, vec!["images.example.com", "cdn.example.com"]);
        assert_eq!(cfg.cache_max_age, DEFAULT_CACHE_MAX_AGE);
        assert_eq!(cfg.store, StoreKind::Sled);
        assert!(cfg.rate_limit);
    }

    #[test]
    fn cache_max_age_override() {
        let cfg = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_ALLOWED_HOSTS", "images.example.com"),
            ("GATEWAY_TRANSFORM_URL", "http://127.0.0.1:9000/"),
            ("GATEWAY_CACHE_MAX_AGE", "600"),
            ("GATEWAY_STORE", "memory"),
            ("DISABLE_RATE_LIMIT", "1"),
        ]))
        .unwrap();

        assert_eq!(cfg.cache_max_age, 600);
        assert_eq!(cfg.store, StoreKind::Memory);
        assert!(!cfg.rate_limit);
    }

    #[test]
    fn rejects_missing_hosts_and_bad_values() {
        let err = GatewayConfig::from_lookup(lookup(&[("GATEWAY_TRANSFORM_URL", "http://t/")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoAllowedHosts));

        let err = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_ALLOWED_HOSTS", "a.example.com"),
            ("GATEWAY_TRANSFORM_URL", "http://t/"),
            ("GATEWAY_CACHE_MAX_AGE", "forever"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "GATEWAY_CACHE_MAX_AGE", .. }));

        let err = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_ALLOWED_HOSTS", "a.example.com"),
            ("GATEWAY_TRANSFORM_URL", "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTransformUrl(_)));
    }
}

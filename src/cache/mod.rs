// Cache tiers consulted by the gateway, leaf to root: the durable object
// store keyed by the semantic cache key, and the edge tier keyed by the
// full request URL.
pub mod disk;
pub mod edge;
pub mod key;
pub mod memory;
pub mod sled_store;

pub use disk::DiskStore;
pub use edge::MemoryEdgeCache;
pub use key::{cache_key, CacheKey};
pub use memory::MemoryStore;
pub use sled_store::{SledStore, StoreStats};

use crate::config::ImageFormat;
use crate::response::CachedResponse;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Corrupt entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Transformed image bytes together with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub bytes: Bytes,
    pub format: ImageFormat,
}

/// Short-lived HTTP-level tier, keyed by the caller-facing URL.
#[async_trait::async_trait]
pub trait EdgeCache: Send + Sync {
    /// Returns the stored response for `url` if one is still fresh.
    async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Stores a full response. Its lifetime comes from its own
    /// `cache-control` header.
    async fn store(&self, url: &str, response: CachedResponse) -> Result<(), CacheError>;
}

/// Persistent tier of transformed images, keyed by [`CacheKey`].
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedImage>, CacheError>;

    async fn put(&self, key: &CacheKey, image: CachedImage) -> Result<(), CacheError>;
}

use crate::cache::{CacheError, CacheKey, CachedImage, DurableStore};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-process durable tier. Nothing survives a restart; meant for tests
/// and single-node experiments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CachedImage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedImage>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, image: CachedImage) -> Result<(), CacheError> {
        self.entries.write().insert(key.clone(), image);
        Ok(())
    }
}

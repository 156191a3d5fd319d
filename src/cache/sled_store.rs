use crate::cache::{CacheError, CacheKey, CachedImage, DurableStore};
use crate::config::ImageFormat;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default maximum store size: 10GB
pub const DEFAULT_MAX_STORE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Metadata stored alongside each image
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryMetadata {
    pub key: String,
    pub format: ImageFormat,
    pub size: usize,
    pub created_at: u64,
    pub accessed_at: u64,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total_size_bytes: u64,
    pub entry_count: usize,
    pub max_size_bytes: u64,
}

/// Durable tier backed by sled.
///
/// Each image is written as two records, `data:<key>` with the raw bytes
/// and `meta:<key>` with JSON [`EntryMetadata`]. Once the total size
/// passes the limit, least recently read entries are evicted down to 90%.
/// The total is tracked in memory; metadata is only scanned on open and
/// when evicting.
pub struct SledStore {
    db: Db,
    max_size: u64,
    current_size: AtomicU64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn backend(e: sled::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

impl SledStore {
    /// Opens (or creates) the sled database at `path`.
    ///
    /// `max_size` defaults to [`DEFAULT_MAX_STORE_SIZE`].
    pub fn open(path: impl AsRef<Path>, max_size: Option<u64>) -> Result<Self, CacheError> {
        let db = sled::open(path).map_err(backend)?;
        let store = Self {
            db,
            max_size: max_size.unwrap_or(DEFAULT_MAX_STORE_SIZE),
            current_size: AtomicU64::new(0),
        };
        let existing: u64 = store.all_metadata().iter().map(|m| m.size as u64).sum();
        store.current_size.store(existing, Ordering::Relaxed);
        Ok(store)
    }

    /// Bytes currently held, as tracked by puts and evictions.
    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    fn shrink(&self, bytes: u64) {
        // the closure never refuses, so this cannot fail
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(bytes)));
    }

    fn metadata_key(key: &str) -> String {
        format!("meta:{}", key)
    }

    fn data_key(key: &str) -> String {
        format!("data:{}", key)
    }

    fn all_metadata(&self) -> Vec<EntryMetadata> {
        self.db
            .scan_prefix(b"meta:")
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<EntryMetadata>(&value).ok())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self.all_metadata();
        StoreStats {
            total_size_bytes: entries.iter().map(|m| m.size as u64).sum(),
            entry_count: entries.len(),
            max_size_bytes: self.max_size,
        }
    }

    /// Evict least recently used entries until under size limit
    fn evict_if_needed(&self) -> Result<(), CacheError> {
        if self.size_bytes() <= self.max_size {
            return Ok(());
        }
        let mut entries = self.all_metadata();
        let current: u64 = entries.iter().map(|m| m.size as u64).sum();
        self.current_size.store(current, Ordering::Relaxed);
        if current <= self.max_size {
            return Ok(());
        }

        tracing::info!("Store size {} exceeds limit {}, starting eviction", current, self.max_size);

        entries.sort_by_key(|e| e.accessed_at);

        let target_to_free = current.saturating_sub(self.max_size * 90 / 100);
        let mut freed = 0u64;
        let mut evicted = 0usize;
        for entry in entries {
            if freed >= target_to_free {
                break;
            }
            self.db.remove(Self::metadata_key(&entry.key).as_bytes()).map_err(backend)?;
            self.db.remove(Self::data_key(&entry.key).as_bytes()).map_err(backend)?;
            freed += entry.size as u64;
            self.shrink(entry.size as u64);
            evicted += 1;
            tracing::debug!("Evicted store entry: key={}, size={}", entry.key, entry.size);
        }

        self.db.flush().map_err(backend)?;
        tracing::info!("Eviction complete: freed {} bytes by removing {} entries", freed, evicted);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DurableStore for SledStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedImage>, CacheError> {
        let meta_key = Self::metadata_key(key.as_str());

        let data = match self.db.get(Self::data_key(key.as_str()).as_bytes()).map_err(backend)? {
            Some(d) => d,
            None => return Ok(None),
        };
        let mut meta = match self.db.get(meta_key.as_bytes()).map_err(backend)? {
            Some(m) => serde_json::from_slice::<EntryMetadata>(&m).map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?,
            // data without metadata: half-written entry, treat as a miss
            None => return Ok(None),
        };

        meta.accessed_at = now_secs();
        match serde_json::to_vec(&meta) {
            Ok(bytes) => {
                if let Err(e) = self.db.insert(meta_key.as_bytes(), bytes) {
                    tracing::warn!("Failed to update access time for key={}: {}", key, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode metadata for key={}: {}", key, e),
        }

        Ok(Some(CachedImage {
            bytes: bytes::Bytes::copy_from_slice(&data),
            format: meta.format,
        }))
    }

    async fn put(&self, key: &CacheKey, image: CachedImage) -> Result<(), CacheError> {
        let now = now_secs();
        let metadata = EntryMetadata {
            key: key.to_string(),
            format: image.format,
            size: image.bytes.len(),
            created_at: now,
            accessed_at: now,
        };
        let meta_bytes = serde_json::to_vec(&metadata).map_err(|e| CacheError::Backend(e.to_string()))?;

        let meta_key = Self::metadata_key(key.as_str());
        let replaced = self
            .db
            .get(meta_key.as_bytes())
            .map_err(backend)?
            .and_then(|m| serde_json::from_slice::<EntryMetadata>(&m).ok())
            .map_or(0, |m| m.size as u64);

        // data first so a reader never sees metadata without bytes
        self.db
            .insert(Self::data_key(key.as_str()).as_bytes(), image.bytes.as_ref())
            .map_err(backend)?;
        self.db
            .insert(meta_key.as_bytes(), meta_bytes)
            .map_err(backend)?;
        self.db.flush().map_err(backend)?;

        self.shrink(replaced);
        self.current_size.fetch_add(image.bytes.len() as u64, Ordering::Relaxed);

        self.evict_if_needed()
    }
}

use crate::cache::{CacheError, EdgeCache};
use crate::response::CachedResponse;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

struct EdgeEntry {
    response: CachedResponse,
    expires_at: Instant,
}

/// Node-local edge tier holding whole responses keyed by request URL.
///
/// An entry lives as long as the `max-age` of the response it holds;
/// responses without one are not stored. When full, expired entries are
/// dropped first, then the entry closest to expiry.
pub struct MemoryEdgeCache {
    entries: RwLock<HashMap<String, EdgeEntry>>,
    capacity: usize,
}

impl MemoryEdgeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries
            .read()
            .get(url)
            .map_or(false, |e| e.expires_at > Instant::now())
    }

    // A store may have replaced the entry since it was seen expired.
    fn remove_if_expired(entries: &mut HashMap<String, EdgeEntry>, url: &str, now: Instant) {
        if entries.get(url).map_or(false, |e| e.expires_at <= now) {
            entries.remove(url);
        }
    }

    fn make_room(entries: &mut HashMap<String, EdgeEntry>, capacity: usize, now: Instant) {
        if entries.len() < capacity {
            return;
        }
        entries.retain(|_, e| e.expires_at > now);
        while entries.len() >= capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    tracing::debug!("Edge cache full, evicting {}", k);
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

#[async_trait::async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(url) {
                None => return Ok(None),
                Some(e) if e.expires_at > now => return Ok(Some(e.response.clone())),
                Some(_) => {}
            }
        }
        // expired: drop it so it stops counting against capacity
        Self::remove_if_expired(&mut self.entries.write(), url, now);
        Ok(None)
    }

    async fn store(&self, url: &str, response: CachedResponse) -> Result<(), CacheError> {
        let ttl = match response.max_age() {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => return Ok(()),
        };
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);

        let mut entries = self.entries.write();
        if !entries.contains_key(url) {
            Self::make_room(&mut entries, self.capacity, now);
        }
        entries.insert(url.to_string(), EdgeEntry { response, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFormat;
    use crate::response::ResponsePolicy;
    use bytes::Bytes;
    use http::{header, HeaderValue};

    fn response(body: &'static [u8], max_age: u64) -> CachedResponse {
        ResponsePolicy::new(max_age).build(Bytes::from_static(body), ImageFormat::jpeg)
    }

    #[tokio::test]
    async fn stores_and_returns_verbatim() {
        let edge = MemoryEdgeCache::new(8);
        let resp = response(b"abc", 60);
        edge.store("http://gw/?src=a", resp.clone()).await.unwrap();

        assert_eq!(edge.lookup("http://gw/?src=a").await.unwrap(), Some(resp));
        assert_eq!(edge.lookup("http://gw/?src=b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn uncacheable_responses_are_skipped() {
        let edge = MemoryEdgeCache::new(8);
        edge.store("u0", response(b"x", 0)).await.unwrap();

        let mut no_store = response(b"x", 60);
        no_store.headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        edge.store("u1", no_store).await.unwrap();

        assert!(edge.is_empty());
    }

    #[tokio::test]
    async fn evicts_when_full() {
        let edge = MemoryEdgeCache::new(2);
        edge.store("short", response(b"1", 10)).await.unwrap();
        edge.store("long", response(b"2", 1000)).await.unwrap();
        edge.store("newest", response(b"3", 500)).await.unwrap();

        assert_eq!(edge.len(), 2);
        assert!(!edge.contains("short"));
        assert!(edge.contains("long"));
        assert!(edge.contains("newest"));
    }

    #[tokio::test]
    async fn expired_entry_is_dropped_but_fresh_replacement_survives() {
        let edge = MemoryEdgeCache::new(4);
        let seen_at = Instant::now();
        edge.entries.write().insert(
            "u".to_string(),
            EdgeEntry { response: response(b"old", 60), expires_at: seen_at },
        );
        assert_eq!(edge.lookup("u").await.unwrap(), None);
        assert!(edge.is_empty());

        // replacement landed between the read and the removal
        edge.store("u", response(b"new", 60)).await.unwrap();
        MemoryEdgeCache::remove_if_expired(&mut edge.entries.write(), "u", seen_at);
        assert_eq!(edge.lookup("u").await.unwrap().unwrap().body, Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn overwriting_does_not_evict() {
        let edge = MemoryEdgeCache::new(2);
        edge.store("a", response(b"1", 10)).await.unwrap();
        edge.store("b", response(b"2", 10)).await.unwrap();
        edge.store("a", response(b"3", 10)).await.unwrap();

        assert_eq!(edge.len(), 2);
        assert_eq!(edge.lookup("a").await.unwrap().unwrap().body, Bytes::from_static(b"3"));
    }
}

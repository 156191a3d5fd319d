use crate::cache::{CacheError, CacheKey, CachedImage, DurableStore};
use crate::config::ImageFormat;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;

const FORMATS: [ImageFormat; 5] = [
    ImageFormat::avif,
    ImageFormat::webp,
    ImageFormat::jpeg,
    ImageFormat::png,
    ImageFormat::gif,
];

/// Durable tier as plain files, one per entry.
///
/// Files are named `<sha256(key)>.<format>`; keys contain URLs and can't be
/// used as file names directly. No size limit and no eviction.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn stem_for(key: &CacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, stem: &str, format: ImageFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, format))
    }
}

#[async_trait::async_trait]
impl DurableStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedImage>, CacheError> {
        let stem = Self::stem_for(key);
        for format in FORMATS {
            match fs::read(self.path_for(&stem, format)).await {
                Ok(bytes) => return Ok(Some(CachedImage { bytes: bytes.into(), format })),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, image: CachedImage) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;

        let stem = Self::stem_for(key);
        let path = self.path_for(&stem, image.format);
        // write-then-rename so readers never see a partial file
        let tmp = self.dir.join(format!("{}.{}.tmp", stem, tmp_suffix()));
        fs::write(&tmp, &image.bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

// Unique enough for temp file names of concurrent writers in one process.
fn tmp_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

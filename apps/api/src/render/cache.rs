//! Disk-backed content-addressable cache for compiled PDFs.
//!
//! One `<hex-key>.pdf` file per entry under a single root. Entries
//! expire lazily on lookup once older than `max_age`; every `put`
//! triggers a cleanup pass that purges expired entries and then evicts
//! oldest-modified-first until total size is back under the ceiling.
//!
//! Eviction is by write time, not access time: a hot entry written
//! long ago is still evicted before a cold one written recently. This
//! trades recency precision for never having to touch entries on read.
//!
//! I/O failures never propagate past this module's `get`: a failed
//! read is a miss. `put` reports its error so the caller can log it,
//! but a lost write only costs a future recompilation.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::render::clock::Clock;
use crate::render::hashing::CacheKey;

const ARTIFACT_EXT: &str = "pdf";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub max_age: Duration,
    pub max_total_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub oldest_age_ms: Option<u64>,
    pub newest_age_ms: Option<u64>,
}

struct EntryMeta {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
    age: Duration,
}

pub struct PdfCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl PdfCache {
    pub async fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.root).await?;
        Ok(Self { config, clock })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.config.root.join(format!("{}.{ARTIFACT_EXT}", key.to_hex()))
    }

    fn age_of(&self, modified: SystemTime) -> Duration {
        // An mtime in the future reads as age zero.
        self.clock
            .now()
            .duration_since(modified)
            .unwrap_or_default()
    }

    /// Looks up the artifact for `key`. A stale entry is deleted during
    /// the lookup and reported as a miss; so is any read error.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.entry_path(key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("cache stat failed for {}, treating as miss: {e}", key.short());
                return None;
            }
        };

        let modified = match meta.modified() {
            Ok(modified) => modified,
            Err(e) => {
                warn!("cache mtime unavailable for {}, treating as miss: {e}", key.short());
                return None;
            }
        };
        if self.age_of(modified) > self.config.max_age {
            debug!("cache entry {} expired, removing", key.short());
            if let Err(e) = fs::remove_file(&path).await {
                warn!("failed to remove expired cache entry {}: {e}", key.short());
            }
            return None;
        }

        match fs::read(&path).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!("cache read failed for {}, treating as miss: {e}", key.short());
                None
            }
        }
    }

    /// Stores the artifact under `key`, overwriting any existing entry
    /// (identical key means identical logical content), then runs the
    /// cleanup pass.
    ///
    /// The write is atomic from a concurrent reader's point of view:
    /// bytes land in a uniquely-named temp file that is renamed into
    /// place, so `get` never observes a truncated artifact.
    pub async fn put(&self, key: &CacheKey, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = self
            .config
            .root
            .join(format!(".{}.{}.tmp", key.to_hex(), Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, self.entry_path(key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        debug!("cached {} bytes for {}", bytes.len(), key.short());

        self.cleanup().await;
        Ok(())
    }

    /// Expiry then size eviction. Idempotent; every error is logged and
    /// skipped so one bad entry cannot wedge the pass.
    pub async fn cleanup(&self) {
        let entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cache cleanup could not list entries: {e}");
                return;
            }
        };

        let mut live = Vec::new();
        for entry in entries {
            if entry.age > self.config.max_age {
                match fs::remove_file(&entry.path).await {
                    Ok(()) => debug!("purged expired cache entry {}", entry.path.display()),
                    Err(e) => warn!("failed to purge {}: {e}", entry.path.display()),
                }
            } else {
                live.push(entry);
            }
        }

        let mut total: u64 = live.iter().map(|e| e.size).sum();
        if total <= self.config.max_total_bytes {
            return;
        }

        live.sort_by_key(|e| e.modified);
        for entry in live {
            if total <= self.config.max_total_bytes {
                break;
            }
            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    total -= entry.size;
                    debug!("evicted cache entry {}", entry.path.display());
                }
                Err(e) => warn!("failed to evict {}: {e}", entry.path.display()),
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cache stats could not list entries: {e}");
                Vec::new()
            }
        };
        let ages: Vec<u64> = entries
            .iter()
            .map(|e| u64::try_from(e.age.as_millis()).unwrap_or(u64::MAX))
            .collect();
        CacheStats {
            count: entries.len(),
            total_size_bytes: entries.iter().map(|e| e.size).sum(),
            oldest_age_ms: ages.iter().max().copied(),
            newest_age_ms: ages.iter().min().copied(),
        }
    }

    /// Deletes every entry. Returns the number removed.
    pub async fn clear(&self) -> usize {
        let entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cache clear could not list entries: {e}");
                return 0;
            }
        };
        let mut deleted = 0;
        for entry in entries {
            match fs::remove_file(&entry.path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("failed to delete {}: {e}", entry.path.display()),
            }
        }
        deleted
    }

    async fn list_entries(&self) -> std::io::Result<Vec<EntryMeta>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.config.root).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let meta = match dirent.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping unreadable cache entry {}: {e}", path.display());
                    continue;
                }
            };
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("skipping cache entry without mtime {}: {e}", path.display());
                    continue;
                }
            };
            entries.push(EntryMeta {
                path,
                size: meta.len(),
                modified,
                age: self.age_of(modified),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::clock::manual::ManualClock;
    use crate::render::hashing::payload_key;
    use tempfile::TempDir;

    fn key(label: &str) -> CacheKey {
        payload_key(&serde_json::json!({ "label": label })).unwrap()
    }

    async fn cache_with(
        max_age_secs: u64,
        max_total_bytes: u64,
    ) -> (PdfCache, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let cache = PdfCache::new(
            CacheConfig {
                root: dir.path().to_path_buf(),
                max_age: Duration::from_secs(max_age_secs),
                max_total_bytes,
            },
            clock.clone(),
        )
        .await
        .unwrap();
        (cache, clock, dir)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (cache, _clock, _dir) = cache_with(3600, 1 << 20).await;
        let k = key("a");
        cache.put(&k, b"%PDF-fake").await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap().as_ref(), b"%PDF-fake");
    }

    #[tokio::test]
    async fn test_absent_key_is_a_miss() {
        let (cache, _clock, _dir) = cache_with(3600, 1 << 20).await;
        assert!(cache.get(&key("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_entry() {
        let (cache, _clock, _dir) = cache_with(3600, 1 << 20).await;
        let k = key("a");
        cache.put(&k, b"old").await.unwrap();
        cache.put(&k, b"new").await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap().as_ref(), b"new");
        assert_eq!(cache.stats().await.count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_lazily_removed_on_get() {
        let (cache, clock, _dir) = cache_with(60, 1 << 20).await;
        let k = key("a");
        cache.put(&k, b"bytes").await.unwrap();

        clock.advance(Duration::from_secs(61));
        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.stats().await.count, 0);
    }

    #[tokio::test]
    async fn test_cleanup_purges_expired_entries() {
        let (cache, clock, _dir) = cache_with(60, 1 << 20).await;
        cache.put(&key("old"), b"bytes").await.unwrap();

        clock.advance(Duration::from_secs(61));
        cache.put(&key("new"), b"bytes").await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.count, 1);
        assert!(cache.get(&key("new")).await.is_some());
    }

    #[tokio::test]
    async fn test_size_eviction_removes_oldest_first() {
        // Ceiling fits two 1 KiB entries but not three.
        let (cache, _clock, _dir) = cache_with(3600, 2560).await;
        let payload = vec![0u8; 1024];

        cache.put(&key("first"), &payload).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put(&key("second"), &payload).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put(&key("third"), &payload).await.unwrap();

        assert!(cache.get(&key("first")).await.is_none());
        assert!(cache.get(&key("second")).await.is_some());
        assert!(cache.get(&key("third")).await.is_some());
        assert!(cache.stats().await.total_size_bytes <= 2560);
    }

    #[tokio::test]
    async fn test_stats_report_ages() {
        let (cache, clock, _dir) = cache_with(3600, 1 << 20).await;
        cache.put(&key("a"), b"bytes").await.unwrap();
        clock.advance(Duration::from_secs(5));

        // The file mtime lands a moment after the clock's epoch, so the
        // measured age is slightly under the 5s advance.
        let stats = cache.stats().await;
        assert_eq!(stats.count, 1);
        assert!(stats.oldest_age_ms.unwrap() >= 4_000);
        assert!(stats.newest_age_ms.unwrap() >= 4_000);
    }

    #[tokio::test]
    async fn test_clear_deletes_everything() {
        let (cache, _clock, _dir) = cache_with(3600, 1 << 20).await;
        cache.put(&key("a"), b"x").await.unwrap();
        cache.put(&key("b"), b"y").await.unwrap();

        assert_eq!(cache.clear().await, 2);
        let stats = cache.stats().await;
        assert_eq!(stats.count, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert!(stats.oldest_age_ms.is_none());
    }
}

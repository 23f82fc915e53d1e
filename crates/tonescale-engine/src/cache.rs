//! Content-addressed result cache.
//!
//! Keys are SHA-256 digests of the decoded pixel buffer, so the same image
//! hits the cache regardless of how it arrived (file, upload, raw buffer).
//! Each key owns a `tokio::sync::OnceCell`: concurrent requests for the same
//! image share one computation. Failed computations leave the cell empty
//! and the next request retries. Expiry and eviction only touch completed
//! entries, so a running computation is never orphaned.

use image::RgbImage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tonescale_core::ClassificationResult;

/// SHA-256 over image dimensions and RGB pixels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn of_image(image: &RgbImage) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(image.as_raw());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes identify an entry well enough in logs.
        write!(f, "ContentKey({}…)", &self.to_hex()[..16])
    }
}

struct Entry {
    cell: Arc<OnceCell<ClassificationResult>>,
    inserted: Instant,
}

/// Single-flight TTL cache of classification results.
pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<ContentKey, Entry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached result for `key`, or the result of `compute`.
    ///
    /// At most one `compute` runs per key at a time; other callers wait for
    /// it. Errors are returned to every waiter that ran `compute` and are
    /// never stored.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: ContentKey,
        compute: F,
    ) -> Result<ClassificationResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClassificationResult, E>>,
    {
        let cell = self.cell_for(key);
        match cell.get_or_try_init(compute).await {
            Ok(result) => Ok(result.clone()),
            Err(e) => {
                self.forget_if_empty(key, &cell);
                Err(e)
            }
        }
    }

    /// Completed, unexpired result for `key`, if any.
    pub fn get(&self, key: &ContentKey) -> Option<ClassificationResult> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .and_then(|e| e.cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ContentKey, Entry>> {
        // Entries stay consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell_for(&self, key: ContentKey) -> Arc<OnceCell<ClassificationResult>> {
        let mut entries = self.lock();
        let now = Instant::now();
        let ttl = self.ttl;
        let before = entries.len();
        // Cells still computing stay put so their waiters keep sharing them.
        entries.retain(|_, e| !e.cell.initialized() || now.duration_since(e.inserted) < ttl);
        if entries.len() < before {
            tracing::debug!(expired = before - entries.len(), "cache entries expired");
        }

        if let Some(entry) = entries.get(&key) {
            tracing::trace!(?key, "cache hit");
            return Arc::clone(&entry.cell);
        }

        if entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .filter(|(_, e)| e.cell.initialized())
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| *k);
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                    tracing::debug!(key = ?oldest, "cache full; evicted oldest entry");
                }
                None => tracing::debug!(
                    in_flight = entries.len(),
                    "cache full of running computations; over capacity until one completes"
                ),
            }
        }

        let cell = Arc::new(OnceCell::new());
        entries.insert(
            key,
            Entry {
                cell: Arc::clone(&cell),
                inserted: now,
            },
        );
        cell
    }

    fn forget_if_empty(&self, key: ContentKey, cell: &Arc<OnceCell<ClassificationResult>>) {
        let mut entries = self.lock();
        let stale = entries
            .get(&key)
            .is_some_and(|e| Arc::ptr_eq(&e.cell, cell) && !e.cell.initialized());
        if stale {
            entries.remove(&key);
        }
    }
}

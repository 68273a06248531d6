use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::errors::StorageResult;
use crate::services::storage::BlobStore;

/// Persisted form of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlCacheSnapshot {
    #[serde(default)]
    pub checked_images: Vec<String>,
    #[serde(default)]
    pub failed_images: Vec<String>,
}

/// Reachability cache shared by every validation call of a run.
///
/// `checked` holds every URL ever resolved, `failed` the unreachable subset.
/// Every mutation keeps `failed ⊆ checked`. Readers take the read lock per
/// lookup; writers merge a whole wave of probe results under one write lock.
/// There is no eviction: known-bad URLs stay bad until explicitly recorded
/// good.
#[derive(Clone, Default)]
pub struct UrlCache {
    inner: Arc<RwLock<CacheSets>>,
}

#[derive(Default)]
struct CacheSets {
    checked: HashSet<String>,
    failed: HashSet<String>,
}

impl CacheSets {
    fn record(&mut self, url: String, reachable: bool) {
        if reachable {
            self.failed.remove(&url);
            self.checked.insert(url);
        } else {
            self.failed.insert(url.clone());
            self.checked.insert(url);
        }
    }
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: UrlCacheSnapshot) -> Self {
        let cache = Self::new();
        cache.absorb(snapshot);
        cache
    }

    /// Load the persisted cache. Any failure yields an empty cache.
    pub async fn load(store: &dyn BlobStore, key: &str) -> Self {
        match Self::read_snapshot(store, key).await {
            Some(snapshot) => Self::from_snapshot(snapshot),
            None => Self::new(),
        }
    }

    /// Read the persisted snapshot, logging and swallowing failures
    pub async fn read_snapshot(store: &dyn BlobStore, key: &str) -> Option<UrlCacheSnapshot> {
        let bytes = match store.get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("URL cache {} unavailable, starting empty: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<UrlCacheSnapshot>(&bytes) {
            Ok(snapshot) => {
                info!(
                    "Loaded URL cache {}: {} checked, {} failed",
                    key,
                    snapshot.checked_images.len(),
                    snapshot.failed_images.len()
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!("URL cache {} is corrupt, starting empty: {}", key, e);
                None
            }
        }
    }

    /// Union a persisted snapshot into this cache.
    ///
    /// Entries listed as failed are also added to `checked`, repairing
    /// snapshots written by tools that did not maintain the invariant. A URL
    /// already known good in memory is not downgraded.
    pub fn absorb(&self, snapshot: UrlCacheSnapshot) {
        let mut sets = self.inner.write();
        for url in snapshot.failed_images {
            if sets.checked.contains(&url) && !sets.failed.contains(&url) {
                continue;
            }
            sets.failed.insert(url.clone());
            sets.checked.insert(url);
        }
        sets.checked.extend(snapshot.checked_images);
    }

    pub fn is_known_good(&self, url: &str) -> bool {
        let sets = self.inner.read();
        sets.checked.contains(url) && !sets.failed.contains(url)
    }

    pub fn is_known_bad(&self, url: &str) -> bool {
        self.inner.read().failed.contains(url)
    }

    pub fn record_good(&self, url: impl Into<String>) {
        self.inner.write().record(url.into(), true);
    }

    pub fn record_bad(&self, url: impl Into<String>) {
        self.inner.write().record(url.into(), false);
    }

    /// Merge one wave of `(url, reachable)` results under a single write lock
    pub fn merge<I>(&self, results: I)
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let mut sets = self.inner.write();
        for (url, reachable) in results {
            sets.record(url, reachable);
        }
    }

    pub fn len_checked(&self) -> usize {
        self.inner.read().checked.len()
    }

    pub fn len_failed(&self) -> usize {
        self.inner.read().failed.len()
    }

    pub fn snapshot(&self) -> UrlCacheSnapshot {
        let sets = self.inner.read();
        let mut checked_images: Vec<String> = sets.checked.iter().cloned().collect();
        let mut failed_images: Vec<String> = sets.failed.iter().cloned().collect();
        drop(sets);

        checked_images.sort_unstable();
        failed_images.sort_unstable();
        UrlCacheSnapshot {
            checked_images,
            failed_images,
        }
    }

    pub async fn save(&self, store: &dyn BlobStore, key: &str) -> StorageResult<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_vec(&snapshot)?;
        store.put(key, json).await?;
        info!(
            "Saved URL cache {}: {} checked, {} failed",
            key,
            snapshot.checked_images.len(),
            snapshot.failed_images.len()
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn invariant_holds(&self) -> bool {
        let sets = self.inner.read();
        sets.failed.is_subset(&sets.checked)
    }
}

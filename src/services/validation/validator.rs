use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::types::ValidationStats;
use crate::orchestration::pools::WorkerPool;
use crate::services::images::ImageHost;
use crate::services::validation::cache::UrlCache;
use crate::utils::Metrics;

/// Where an input URL stands before any probing
enum Verdict {
    Good,
    Bad,
    Unknown,
}

fn looks_like_url(value: &str) -> bool {
    value.starts_with("http")
}

/// Cache-aware concurrent reachability check
pub struct UrlValidator {
    host: Arc<dyn ImageHost>,
    cache: UrlCache,
    pool: WorkerPool,
    wave_size: usize,
    metrics: Option<Metrics>,
}

impl UrlValidator {
    pub fn new(
        host: Arc<dyn ImageHost>,
        cache: UrlCache,
        pool: WorkerPool,
        wave_size: usize,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            host,
            cache,
            pool,
            wave_size: wave_size.max(1),
            metrics,
        }
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    /// Replace every entry that is not reachable with `None`.
    ///
    /// Output has the same length and order as `urls`.
    pub async fn validate(&self, urls: &[Option<String>]) -> Vec<Option<String>> {
        self.validate_with_stats(urls).await.0
    }

    #[instrument(skip_all, fields(total = urls.len()))]
    pub async fn validate_with_stats(
        &self,
        urls: &[Option<String>],
    ) -> (Vec<Option<String>>, ValidationStats) {
        let mut stats = ValidationStats {
            total: urls.len(),
            ..Default::default()
        };
        if urls.is_empty() {
            return (Vec::new(), stats);
        }

        // 1. Partition against the cache; unknown URLs are probed once per call
        let mut verdicts = Vec::with_capacity(urls.len());
        let mut unknown: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for url in urls {
            let verdict = match url.as_deref() {
                Some(u) if looks_like_url(u) => {
                    if self.cache.is_known_bad(u) {
                        stats.cache_hits += 1;
                        Verdict::Bad
                    } else if self.cache.is_known_good(u) {
                        stats.cache_hits += 1;
                        Verdict::Good
                    } else {
                        if seen.insert(u) {
                            unknown.push(u.to_string());
                        }
                        Verdict::Unknown
                    }
                }
                _ => Verdict::Bad,
            };
            verdicts.push(verdict);
        }

        if let Some(ref m) = self.metrics {
            m.record_cache_lookups(stats.cache_hits, unknown.len());
        }

        // 2-3. Probe in waves on the I/O pool, merging each wave into the cache
        let mut probed: HashMap<String, bool> = HashMap::with_capacity(unknown.len());
        for (i, wave) in unknown.chunks(self.wave_size).enumerate() {
            debug!("Probing wave {} ({} URLs)", i + 1, wave.len());
            let results = self
                .pool
                .map_ordered(wave.to_vec(), |url| {
                    let host = Arc::clone(&self.host);
                    async move {
                        let reachable = host.probe(&url).await;
                        (url, reachable)
                    }
                })
                .await;

            probed.extend(results.iter().cloned());
            self.cache.merge(results);
        }
        stats.probed = probed.len();

        // 4. Assemble the cleaned list
        let cleaned: Vec<Option<String>> = urls
            .iter()
            .zip(verdicts)
            .map(|(url, verdict)| match verdict {
                Verdict::Good => url.clone(),
                Verdict::Bad => None,
                Verdict::Unknown => url
                    .as_ref()
                    .filter(|u| probed.get(u.as_str()).copied().unwrap_or(false))
                    .cloned(),
            })
            .collect();

        stats.reachable = cleaned.iter().filter(|u| u.is_some()).count();
        stats.rejected = stats.total - stats.reachable;

        debug!(
            "Validated {} URLs: {} cache hits, {} probed, {} reachable",
            stats.total, stats.cache_hits, stats.probed, stats.reachable
        );

        (cleaned, stats)
    }
}

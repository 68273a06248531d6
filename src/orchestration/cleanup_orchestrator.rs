// Cleanup orchestrator: stage sequencing, table I/O and cache lifecycle

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::table::ProductTable;
use crate::core::types::{CleanupRequest, Stage, StageReport};
use crate::orchestration::pools::WorkerPools;
use crate::phases::image_stage::{drop_rows_without_front, FrontImageReassigner};
use crate::phases::url_stage::UrlCleaner;
use crate::services::classifier::{BatchDispatcher, HttpClassifier, ImageClassifier};
use crate::services::images::{HttpImageHost, ImageHost, ImageUrlDeriver};
use crate::services::storage::{BlobStore, LocalBlobStore};
use crate::services::validation::{UrlCache, UrlValidator};
use crate::utils::Metrics;

/// Runs the two cleanup stages against a blob store.
///
/// One `UrlCache` lives as long as the orchestrator and is shared by both
/// stages and every run. Each stage first unions the persisted snapshot into
/// it and writes it back when done, so concurrent runs only ever add entries.
pub struct CleanupOrchestrator {
    config: Arc<Config>,
    store: Arc<dyn BlobStore>,
    cache: UrlCache,
    url_cleaner: UrlCleaner,
    reassigner: FrontImageReassigner,
    /// Held while the cache blob is written so saves land one at a time
    cache_write: Mutex<()>,
    metrics: Metrics,
}

impl CleanupOrchestrator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn BlobStore>,
        host: Arc<dyn ImageHost>,
        classifier: Arc<dyn ImageClassifier>,
        metrics: Metrics,
    ) -> Self {
        let pools = WorkerPools::from_config(&config);
        let cache = UrlCache::new();

        let validator = Arc::new(UrlValidator::new(
            Arc::clone(&host),
            cache.clone(),
            pools.io.clone(),
            config.wave_size(),
            Some(metrics.clone()),
        ));
        let dispatcher = Arc::new(BatchDispatcher::from_config(
            &config,
            host,
            classifier,
            pools.clone(),
            Some(metrics.clone()),
        ));

        info!(
            "Pools: {} = {} permits, {} = {} permits",
            pools.io.name(),
            pools.io.size(),
            pools.compute.name(),
            pools.compute.size()
        );

        Self {
            url_cleaner: UrlCleaner::new(
                ImageUrlDeriver::from_config(&config),
                Arc::clone(&validator),
            ),
            reassigner: FrontImageReassigner::new(validator, dispatcher, Some(metrics.clone())),
            config,
            store,
            cache,
            cache_write: Mutex::new(()),
            metrics,
        }
    }

    /// Wire the HTTP image host, HTTP classifier and local blob store
    pub fn from_config(config: Arc<Config>, metrics: Metrics) -> anyhow::Result<Self> {
        let store = Arc::new(LocalBlobStore::new(config.data_dir()));
        let host = Arc::new(
            HttpImageHost::new(&config, Some(metrics.clone()))
                .context("Failed to build image host client")?,
        );
        let classifier = Arc::new(
            HttpClassifier::new(&config, Some(metrics.clone()))
                .context("Failed to build classifier client")?,
        );
        Ok(Self::new(config, store, host, classifier, metrics))
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn load_table(&self, key: &str) -> PipelineResult<ProductTable> {
        let bytes = self
            .store
            .get(key)
            .await
            .map_err(|source| PipelineError::TableLoad {
                key: key.to_string(),
                source,
            })?;
        ProductTable::from_tsv(&bytes).map_err(|source| PipelineError::TableParse {
            key: key.to_string(),
            source,
        })
    }

    async fn save_table(&self, key: &str, table: &ProductTable) -> PipelineResult<()> {
        self.store
            .put(key, table.to_tsv())
            .await
            .map_err(|source| PipelineError::TableSave {
                key: key.to_string(),
                source,
            })
    }

    /// Union the persisted cache into memory; a missing or bad blob is skipped
    async fn refresh_cache(&self) {
        let key = self.config.url_cache_key();
        if let Some(snapshot) = UrlCache::read_snapshot(self.store.as_ref(), key).await {
            self.cache.absorb(snapshot);
        }
        self.metrics.update_cache_size(self.cache.len_checked());
    }

    async fn persist_cache(&self) -> PipelineResult<()> {
        let _guard = self.cache_write.lock().await;
        self.cache
            .save(self.store.as_ref(), self.config.url_cache_key())
            .await
            .map_err(PipelineError::CacheSave)?;
        self.metrics.update_cache_size(self.cache.len_checked());
        Ok(())
    }

    /// Stage 1: derive, validate and write back the four image URLs
    #[instrument(skip(self))]
    pub async fn run_url_stage(&self, source: &str, output: &str) -> PipelineResult<StageReport> {
        let started = Instant::now();
        let mut report = StageReport::new(Stage::Urls, source, output);

        self.refresh_cache().await;
        let mut table = self.load_table(source).await?;
        report.rows_in = table.len();

        let urls = self.url_cleaner.run(&mut table).await?;
        report.urls_derived = urls.urls_derived;
        report.validation = urls.validation;

        self.save_table(output, &table).await?;
        self.persist_cache().await?;

        report.rows_out = table.len();
        report.elapsed = started.elapsed();
        self.metrics.record_stage_duration(Stage::Urls, report.elapsed);

        info!(
            "URL stage {} -> {}: {} rows, {} URLs kept of {} derived in {:.2}s",
            source,
            output,
            report.rows_out,
            report.validation.reachable,
            report.urls_derived,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Stage 2: put a classified front image in slot 1 or drop the product
    #[instrument(skip(self))]
    pub async fn run_image_stage(&self, source: &str, output: &str) -> PipelineResult<StageReport> {
        let started = Instant::now();
        let mut report = StageReport::new(Stage::Images, source, output);

        self.refresh_cache().await;
        let mut table = self.load_table(source).await?;
        report.rows_in = table.len();

        let reassigned = self.reassigner.run(&mut table).await;
        report.validation = reassigned.validation;
        report.fronts_found = reassigned.fronts_found;
        report.fronts_moved = reassigned.fronts_moved;
        report.rows_cleared = reassigned.rows_cleared;

        report.rows_dropped = drop_rows_without_front(&mut table);
        self.metrics.record_rows_dropped(report.rows_dropped);

        self.save_table(output, &table).await?;
        self.persist_cache().await?;

        report.rows_out = table.len();
        report.elapsed = started.elapsed();
        self.metrics.record_stage_duration(Stage::Images, report.elapsed);

        info!(
            "Image stage {} -> {}: {} of {} rows kept, {} fronts ({} moved) in {:.2}s",
            source,
            output,
            report.rows_out,
            report.rows_in,
            report.fronts_found,
            report.fronts_moved,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Both stages back to back; the image stage reads the URL stage output
    pub async fn run_cleanup(&self, request: &CleanupRequest) -> PipelineResult<Vec<StageReport>> {
        self.tracked(async {
            let urls = self
                .run_url_stage(&request.source, &request.url_output)
                .await?;
            let images = self
                .run_image_stage(&request.url_output, &request.image_output)
                .await?;
            Ok(vec![urls, images])
        })
        .await
    }

    async fn tracked<T, F>(&self, run: F) -> PipelineResult<T>
    where
        F: Future<Output = PipelineResult<T>>,
    {
        self.metrics.record_run_started();
        let result = run.await;
        match result {
            Ok(_) => self.metrics.record_run_completed(),
            Err(_) => self.metrics.record_run_failed(),
        }
        result
    }

    pub fn spawn_cleanup(self: &Arc<Self>, request: CleanupRequest) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_cleanup(&request).await {
                error!("Cleanup of {} failed: {}", request.source, e);
            }
        })
    }

    pub fn spawn_url_stage(self: &Arc<Self>, source: String, output: String) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.tracked(this.run_url_stage(&source, &output)).await {
                error!("URL stage for {} failed: {}", source, e);
            }
        })
    }

    pub fn spawn_image_stage(self: &Arc<Self>, source: String, output: String) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.tracked(this.run_image_stage(&source, &output)).await {
                error!("Image stage for {} failed: {}", source, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ImageSlot;
    use crate::services::storage::MemoryBlobStore;
    use crate::services::validation::UrlCacheSnapshot;
    use crate::test_utils::{FakeClassifier, FakeImageHost};

    const BASE: &str = "https://images.openfoodfacts.org/images/products";

    const SOURCE: &str = "code\tproduct_name\timage_1\n\
        12345\tBiscuits\t\n\
        1234567890123\tCereal\t\n\
        777\tGhost\t\n";

    fn url(path: &str, slot: u8) -> String {
        format!("{BASE}/{path}/{slot}.jpg")
    }

    struct Harness {
        store: MemoryBlobStore,
        host: Arc<FakeImageHost>,
        metrics: Metrics,
        orchestrator: Arc<CleanupOrchestrator>,
    }

    fn harness(host: FakeImageHost, classifier: FakeClassifier) -> Harness {
        let config = Arc::new(Config::with_classifier_endpoint("http://classifier.test"));
        let store = MemoryBlobStore::new();
        store.insert("products.tsv", SOURCE);
        let host = Arc::new(host);
        let metrics = Metrics::new();
        let orchestrator = Arc::new(CleanupOrchestrator::new(
            config,
            Arc::new(store.clone()),
            host.clone(),
            Arc::new(classifier),
            metrics.clone(),
        ));
        Harness {
            store,
            host,
            metrics,
            orchestrator,
        }
    }

    fn default_harness() -> Harness {
        // 12345: slots 1 and 2 exist, slot 2 is the front
        // 1234567890123: slot 1 exists and is a back
        // 777: nothing exists
        let host = FakeImageHost::with_good([
            url("12345", 1),
            url("12345", 2),
            url("123/456/789/0123", 1),
        ]);
        let classifier = FakeClassifier::with_fronts([url("12345", 2)]);
        harness(host, classifier)
    }

    fn request() -> CleanupRequest {
        CleanupRequest {
            source: "products.tsv".to_string(),
            url_output: "products_urls.tsv".to_string(),
            image_output: "products_clean.tsv".to_string(),
        }
    }

    fn read_table(store: &MemoryBlobStore, key: &str) -> ProductTable {
        ProductTable::from_tsv(&store.read(key).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_full_cleanup_end_to_end() {
        let h = default_harness();

        let reports = h.orchestrator.run_cleanup(&request()).await.unwrap();
        assert_eq!(reports.len(), 2);

        let urls = read_table(&h.store, "products_urls.tsv");
        assert_eq!(urls.len(), 3);
        assert_eq!(urls.image(0, ImageSlot::FRONT), Some(url("12345", 1).as_str()));
        assert_eq!(
            urls.image(0, ImageSlot::new(2).unwrap()),
            Some(url("12345", 2).as_str())
        );
        assert_eq!(urls.image(2, ImageSlot::FRONT), None);
        assert_eq!(reports[0].urls_derived, 12);
        assert_eq!(reports[0].validation.reachable, 3);

        let clean = read_table(&h.store, "products_clean.tsv");
        assert_eq!(clean.len(), 1);
        assert_eq!(clean.code(0), Some("12345"));
        assert_eq!(clean.image(0, ImageSlot::FRONT), Some(url("12345", 2).as_str()));
        assert_eq!(
            clean.image(0, ImageSlot::new(2).unwrap()),
            Some(url("12345", 1).as_str())
        );
        assert_eq!(clean.get(0, "product_name"), Some("Biscuits"));

        let images = &reports[1];
        assert_eq!(images.rows_in, 3);
        assert_eq!(images.rows_out, 1);
        assert_eq!(images.rows_dropped, 2);
        assert_eq!(images.fronts_found, 1);
        assert_eq!(images.fronts_moved, 1);

        // Stage 2 re-validated the stage 1 survivors from cache only
        assert_eq!(h.host.probe_count(), 12);
        // Only non-null slot URLs of pending rows are downloaded
        assert_eq!(h.host.fetch_count(), 3);

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.runs_started, 1);
        assert_eq!(snapshot.runs_completed, 1);
        assert_eq!(snapshot.rows_dropped, 2);
        assert_eq!(snapshot.fronts_found, 1);
    }

    #[tokio::test]
    async fn test_cache_persisted_and_reused() {
        let h = default_harness();
        h.orchestrator
            .run_url_stage("products.tsv", "out.tsv")
            .await
            .unwrap();

        let bytes = h.store.read("url_cache.json").unwrap();
        let snapshot: UrlCacheSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.checked_images.len(), 12);
        assert_eq!(snapshot.failed_images.len(), 9);
        assert!(snapshot
            .failed_images
            .iter()
            .all(|u| snapshot.checked_images.contains(u)));

        // A fresh orchestrator over the same store probes nothing
        let host = Arc::new(FakeImageHost::default());
        let second = CleanupOrchestrator::new(
            Arc::new(Config::with_classifier_endpoint("http://classifier.test")),
            Arc::new(h.store.clone()),
            host.clone(),
            Arc::new(FakeClassifier::default()),
            Metrics::new(),
        );
        let report = second.run_url_stage("products.tsv", "again.tsv").await.unwrap();
        assert_eq!(host.probe_count(), 0);
        assert_eq!(report.validation.cache_hits, 12);
        assert_eq!(h.store.read("out.tsv"), h.store.read("again.tsv"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_stages_on_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalBlobStore::new(dir.path()));
        store.put("products.tsv", SOURCE.as_bytes().to_vec()).await.unwrap();

        let host = FakeImageHost::with_good([url("12345", 1)]);
        let orchestrator = Arc::new(CleanupOrchestrator::new(
            Arc::new(Config::with_classifier_endpoint("http://classifier.test")),
            store.clone(),
            Arc::new(host),
            Arc::new(FakeClassifier::default()),
            Metrics::new(),
        ));

        let runs = (0..6).map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .run_url_stage("products.tsv", &format!("out_{i}.tsv"))
                    .await
            })
        });
        for result in futures::future::join_all(runs).await {
            result.unwrap().unwrap();
        }

        let bytes = store.get("url_cache.json").await.unwrap();
        let snapshot: UrlCacheSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.checked_images.len(), 12);
        assert_eq!(snapshot.failed_images.len(), 11);
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let h = default_harness();
        let err = h
            .orchestrator
            .run_url_stage("nope.tsv", "out.tsv")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TableLoad { .. }));
        assert!(!h.store.contains("out.tsv"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_blob_is_ignored() {
        let h = default_harness();
        h.store.insert("url_cache.json", "{not json");

        let report = h
            .orchestrator
            .run_url_stage("products.tsv", "out.tsv")
            .await
            .unwrap();
        assert_eq!(report.validation.probed, 12);
        // Rewritten with valid content
        let bytes = h.store.read("url_cache.json").unwrap();
        assert!(serde_json::from_slice::<UrlCacheSnapshot>(&bytes).is_ok());
    }

    #[tokio::test]
    async fn test_spawned_failure_is_counted() {
        let h = default_harness();
        let mut req = request();
        req.source = "missing.tsv".to_string();

        h.orchestrator.spawn_cleanup(req).await.unwrap();
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.runs_started, 1);
        assert_eq!(snapshot.runs_failed, 1);

        h.orchestrator
            .spawn_url_stage("products.tsv".to_string(), "urls.tsv".to_string())
            .await
            .unwrap();
        assert!(h.store.contains("urls.tsv"));
        assert_eq!(h.metrics.snapshot().runs_completed, 1);
    }
}

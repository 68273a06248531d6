use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::Stage;

/// Latency and duration samples kept per series; older samples are dropped
const MAX_SAMPLES: usize = 1024;

/// Fixed-capacity window of the most recent samples
struct SampleWindow {
    samples: RwLock<VecDeque<u64>>,
}

impl SampleWindow {
    fn new() -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    fn push(&self, duration: Duration) {
        let mut samples = self.samples.write();
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(duration.as_millis() as u64);
    }

    fn values(&self) -> Vec<u64> {
        self.samples.read().iter().copied().collect()
    }
}

/// Process-wide metrics collector.
///
/// Tracks image host traffic, URL cache effectiveness, classifier calls,
/// stage durations and pipeline runs. Cheap to clone; every clone shares the
/// same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Image host
    probes_total: AtomicUsize,
    probes_failed: AtomicUsize,
    fetches_total: AtomicUsize,
    fetches_failed: AtomicUsize,

    // URL cache
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    cache_size: AtomicUsize,

    // Classifier
    classifier_calls_total: AtomicUsize,
    classifier_calls_success: AtomicUsize,
    classifier_calls_failed: AtomicUsize,
    classifier_images_sent: AtomicUsize,
    classifier_latency_ms: SampleWindow,

    // Stages
    url_stage_duration_ms: SampleWindow,
    image_stage_duration_ms: SampleWindow,

    // Batches and results
    batches_processed: AtomicUsize,
    images_processed: AtomicUsize,
    fronts_found: AtomicUsize,
    rows_dropped: AtomicUsize,

    // Pipeline runs
    runs_started: AtomicUsize,
    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                probes_total: AtomicUsize::new(0),
                probes_failed: AtomicUsize::new(0),
                fetches_total: AtomicUsize::new(0),
                fetches_failed: AtomicUsize::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                cache_size: AtomicUsize::new(0),
                classifier_calls_total: AtomicUsize::new(0),
                classifier_calls_success: AtomicUsize::new(0),
                classifier_calls_failed: AtomicUsize::new(0),
                classifier_images_sent: AtomicUsize::new(0),
                classifier_latency_ms: SampleWindow::new(),
                url_stage_duration_ms: SampleWindow::new(),
                image_stage_duration_ms: SampleWindow::new(),
                batches_processed: AtomicUsize::new(0),
                images_processed: AtomicUsize::new(0),
                fronts_found: AtomicUsize::new(0),
                rows_dropped: AtomicUsize::new(0),
                runs_started: AtomicUsize::new(0),
                runs_completed: AtomicUsize::new(0),
                runs_failed: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Image host
    pub fn record_probe(&self, reachable: bool) {
        self.inner.probes_total.fetch_add(1, Ordering::Relaxed);
        if !reachable {
            self.inner.probes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fetch(&self, success: bool) {
        self.inner.fetches_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.fetches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // URL cache
    pub fn record_cache_lookups(&self, hits: usize, misses: usize) {
        self.inner.cache_hits.fetch_add(hits, Ordering::Relaxed);
        self.inner.cache_misses.fetch_add(misses, Ordering::Relaxed);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed);
    }

    // Classifier
    pub fn record_classifier_call(&self, success: bool, duration: Duration, images: usize) {
        self.inner.classifier_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.classifier_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.classifier_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.classifier_images_sent.fetch_add(images, Ordering::Relaxed);
        self.inner.classifier_latency_ms.push(duration);
    }

    // Stages
    pub fn record_stage_duration(&self, stage: Stage, duration: Duration) {
        let durations = match stage {
            Stage::Urls => &self.inner.url_stage_duration_ms,
            Stage::Images => &self.inner.image_stage_duration_ms,
        };
        durations.push(duration);
    }

    // Batches and results
    pub fn record_batch_processed(&self, num_images: usize) {
        self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.images_processed.fetch_add(num_images, Ordering::Relaxed);
    }

    pub fn record_fronts_found(&self, count: usize) {
        self.inner.fronts_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_dropped(&self, count: usize) {
        self.inner.rows_dropped.fetch_add(count, Ordering::Relaxed);
    }

    // Pipeline runs
    pub fn record_run_started(&self) {
        self.inner.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.inner.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.inner.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut latency = self.inner.classifier_latency_ms.values();
        latency.sort_unstable();
        let classifier_latency_avg_ms = avg(&latency);
        let classifier_latency_p50_ms = percentile(&latency, 0.5);
        let classifier_latency_p95_ms = percentile(&latency, 0.95);
        let classifier_latency_p99_ms = percentile(&latency, 0.99);

        let url_stage_avg_ms = avg(&self.inner.url_stage_duration_ms.values());
        let image_stage_avg_ms = avg(&self.inner.image_stage_duration_ms.values());

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let endpoint_requests = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            probes_total: self.inner.probes_total.load(Ordering::Relaxed),
            probes_failed: self.inner.probes_failed.load(Ordering::Relaxed),
            fetches_total: self.inner.fetches_total.load(Ordering::Relaxed),
            fetches_failed: self.inner.fetches_failed.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            cache_size: self.inner.cache_size.load(Ordering::Relaxed),
            classifier_calls_total: self.inner.classifier_calls_total.load(Ordering::Relaxed),
            classifier_calls_success: self.inner.classifier_calls_success.load(Ordering::Relaxed),
            classifier_calls_failed: self.inner.classifier_calls_failed.load(Ordering::Relaxed),
            classifier_images_sent: self.inner.classifier_images_sent.load(Ordering::Relaxed),
            classifier_latency_avg_ms,
            classifier_latency_p50_ms,
            classifier_latency_p95_ms,
            classifier_latency_p99_ms,
            url_stage_avg_ms,
            image_stage_avg_ms,
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            fronts_found: self.inner.fronts_found.load(Ordering::Relaxed),
            rows_dropped: self.inner.rows_dropped.load(Ordering::Relaxed),
            runs_started: self.inner.runs_started.load(Ordering::Relaxed),
            runs_completed: self.inner.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.inner.runs_failed.load(Ordering::Relaxed),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            r#"# HELP image_probes_total Existence checks sent to the image host
# TYPE image_probes_total counter
image_probes_total {{}} {}

# HELP image_probes_failed_total Existence checks that found no image
# TYPE image_probes_failed_total counter
image_probes_failed_total {{}} {}

# HELP image_fetches_total Image downloads attempted
# TYPE image_fetches_total counter
image_fetches_total {{}} {}

# HELP image_fetches_failed_total Image downloads that produced no bytes
# TYPE image_fetches_failed_total counter
image_fetches_failed_total {{}} {}

# HELP url_cache_hit_rate URL cache hit rate (0.0 to 1.0)
# TYPE url_cache_hit_rate gauge
url_cache_hit_rate {{}} {}

# HELP url_cache_size URLs known to the cache
# TYPE url_cache_size gauge
url_cache_size {{}} {}

# HELP classifier_calls_total Requests sent to the classifier
# TYPE classifier_calls_total counter
classifier_calls_total {{}} {}

# HELP classifier_calls_failed_total Classifier requests that failed in transport
# TYPE classifier_calls_failed_total counter
classifier_calls_failed_total {{}} {}

# HELP classifier_latency_avg_ms Average classifier latency in milliseconds
# TYPE classifier_latency_avg_ms gauge
classifier_latency_avg_ms {{}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms {{stage="url"}} {}
stage_avg_duration_ms {{stage="image"}} {}

# HELP images_processed_total Images passed through classification
# TYPE images_processed_total counter
images_processed_total {{}} {}

# HELP fronts_found_total Images labelled as front
# TYPE fronts_found_total counter
fronts_found_total {{}} {}

# HELP rows_dropped_total Products dropped for lacking a front image
# TYPE rows_dropped_total counter
rows_dropped_total {{}} {}

# HELP pipeline_runs_total Pipeline runs by result
# TYPE pipeline_runs_total counter
pipeline_runs_total {{result="started"}} {}
pipeline_runs_total {{result="completed"}} {}
pipeline_runs_total {{result="failed"}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            s.probes_total,
            s.probes_failed,
            s.fetches_total,
            s.fetches_failed,
            s.cache_hit_rate,
            s.cache_size,
            s.classifier_calls_total,
            s.classifier_calls_failed,
            s.classifier_latency_avg_ms,
            s.url_stage_avg_ms,
            s.image_stage_avg_ms,
            s.images_processed,
            s.fronts_found,
            s.rows_dropped,
            s.runs_started,
            s.runs_completed,
            s.runs_failed,
            s.uptime_seconds,
        );

        if !s.endpoint_requests.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n");
            out.push_str("# TYPE http_requests_total counter\n");
            for (endpoint, count) in &s.endpoint_requests {
                out.push_str(&format!(
                    "http_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub probes_total: usize,
    pub probes_failed: usize,
    pub fetches_total: usize,
    pub fetches_failed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub classifier_calls_total: usize,
    pub classifier_calls_success: usize,
    pub classifier_calls_failed: usize,
    pub classifier_images_sent: usize,
    pub classifier_latency_avg_ms: u64,
    pub classifier_latency_p50_ms: u64,
    pub classifier_latency_p95_ms: u64,
    pub classifier_latency_p99_ms: u64,
    pub url_stage_avg_ms: u64,
    pub image_stage_avg_ms: u64,
    pub batches_processed: usize,
    pub images_processed: usize,
    pub fronts_found: usize,
    pub rows_dropped: usize,
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub endpoint_requests: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

/// `sorted` must be in ascending order
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_probe(true);
        metrics.record_probe(false);
        metrics.record_fetch(false);
        metrics.record_cache_lookups(3, 1);
        metrics.record_classifier_call(true, Duration::from_millis(100), 12);
        metrics.record_classifier_call(false, Duration::from_millis(50), 4);
        metrics.record_batch_processed(10);
        metrics.record_fronts_found(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.probes_total, 2);
        assert_eq!(snapshot.probes_failed, 1);
        assert_eq!(snapshot.fetches_failed, 1);
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hit_rate, 0.75);
        assert_eq!(snapshot.classifier_calls_total, 2);
        assert_eq!(snapshot.classifier_calls_success, 1);
        assert_eq!(snapshot.classifier_calls_failed, 1);
        assert_eq!(snapshot.classifier_images_sent, 16);
        assert_eq!(snapshot.classifier_latency_avg_ms, 75);
        assert_eq!(snapshot.images_processed, 10);
        assert_eq!(snapshot.fronts_found, 2);
    }

    #[test]
    fn test_stage_durations_kept_apart() {
        let metrics = Metrics::new();
        metrics.record_stage_duration(Stage::Urls, Duration::from_millis(200));
        metrics.record_stage_duration(Stage::Urls, Duration::from_millis(400));
        metrics.record_stage_duration(Stage::Images, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.url_stage_avg_ms, 300);
        assert_eq!(snapshot.image_stage_avg_ms, 30);
    }

    #[test]
    fn test_samples_are_bounded() {
        let metrics = Metrics::new();
        for ms in 0..(MAX_SAMPLES as u64 + 500) {
            metrics.record_classifier_call(true, Duration::from_millis(ms), 1);
        }

        let window = metrics.inner.classifier_latency_ms.values();
        assert_eq!(window.len(), MAX_SAMPLES);
        // Oldest samples were dropped first
        assert_eq!(window[0], 500);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.classifier_calls_total, MAX_SAMPLES + 500);
        assert_eq!(snapshot.classifier_latency_p99_ms, 500 + ((MAX_SAMPLES as f64 - 1.0) * 0.99) as u64);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_classifier_call(true, Duration::from_millis(100), 1);
        metrics.record_run_started();
        metrics.record_endpoint_request("/cleanup");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("classifier_calls_total {} 1"));
        assert!(prometheus.contains("pipeline_runs_total {result=\"started\"} 1"));
        assert!(prometheus.contains("http_requests_total {endpoint=\"/cleanup\"} 1"));
    }
}

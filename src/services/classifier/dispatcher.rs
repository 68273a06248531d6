use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::config::Config;
use crate::core::types::{ClassificationOutcome, FailureReason};
use crate::orchestration::pools::WorkerPools;
use crate::services::classifier::client::ImageClassifier;
use crate::services::images::ImageHost;
use crate::utils::Metrics;

type ImageBytes = Option<Vec<u8>>;

/// Split an owned list into consecutive batches of at most `size`
fn into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size.max(1)).collect());
    }
    batches
}

/// Force a classifier answer to exactly `len` positions
fn align(mut outcomes: Vec<ClassificationOutcome>, len: usize) -> Vec<ClassificationOutcome> {
    outcomes.truncate(len);
    outcomes.resize(len, ClassificationOutcome::Failure(FailureReason::MissingResult));
    outcomes
}

/// Fetches images and classifies them in chunked batches.
///
/// For each outer chunk of URLs the bytes are fetched on the I/O pool, then
/// split into inner batches that run on the compute pool. A chunk finishes
/// completely before the next one is fetched.
pub struct BatchDispatcher {
    host: Arc<dyn ImageHost>,
    classifier: Arc<dyn ImageClassifier>,
    pools: WorkerPools,
    chunk_size: usize,
    batch_size: usize,
    metrics: Option<Metrics>,
}

impl BatchDispatcher {
    pub fn new(
        host: Arc<dyn ImageHost>,
        classifier: Arc<dyn ImageClassifier>,
        pools: WorkerPools,
        chunk_size: usize,
        batch_size: usize,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            host,
            classifier,
            pools,
            chunk_size: chunk_size.max(1),
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    pub fn from_config(
        config: &Config,
        host: Arc<dyn ImageHost>,
        classifier: Arc<dyn ImageClassifier>,
        pools: WorkerPools,
        metrics: Option<Metrics>,
    ) -> Self {
        Self::new(
            host,
            classifier,
            pools,
            config.chunk_size(),
            config.batch_size(),
            metrics,
        )
    }

    /// One outcome per input URL, in input order. `None` URLs and URLs whose
    /// bytes cannot be fetched resolve to `Failure(MissingImage)`.
    #[instrument(skip_all, fields(total = urls.len()))]
    pub async fn classify_urls(&self, urls: &[Option<String>]) -> Vec<ClassificationOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }

        // Less than one inner batch: no chunking
        if urls.len() < self.batch_size {
            let images = self.fetch_all(urls).await;
            let outcomes = self.classify_direct(images).await;
            self.record(urls.len());
            return outcomes;
        }

        let mut outcomes = Vec::with_capacity(urls.len());
        for (i, chunk) in urls.chunks(self.chunk_size).enumerate() {
            let images = self.fetch_all(chunk).await;
            let fetched = images.iter().filter(|b| b.is_some()).count();

            let batches = into_batches(images, self.batch_size);
            debug!(
                "Chunk {}: {}/{} images fetched, {} batches",
                i + 1,
                fetched,
                chunk.len(),
                batches.len()
            );

            let results = self
                .pools
                .compute
                .map_ordered(batches, |batch| {
                    let classifier = Arc::clone(&self.classifier);
                    async move {
                        let len = batch.len();
                        align(classifier.classify_batch(batch).await, len)
                    }
                })
                .await;

            outcomes.extend(results.into_iter().flatten());
            self.record(chunk.len());
        }

        outcomes
    }

    async fn fetch_all(&self, urls: &[Option<String>]) -> Vec<ImageBytes> {
        self.pools
            .io
            .map_ordered(urls.to_vec(), |url| {
                let host = Arc::clone(&self.host);
                async move {
                    match url {
                        Some(url) => host.fetch(&url).await,
                        None => None,
                    }
                }
            })
            .await
    }

    /// Single request on the compute pool; one image goes to the single endpoint
    async fn classify_direct(&self, images: Vec<ImageBytes>) -> Vec<ClassificationOutcome> {
        let len = images.len();
        let classifier = Arc::clone(&self.classifier);
        let mut results = self
            .pools
            .compute
            .map_ordered(vec![images], |mut images| {
                let classifier = Arc::clone(&classifier);
                async move {
                    if images.len() == 1 {
                        match images.pop().flatten() {
                            Some(bytes) => vec![classifier.classify_one(bytes).await],
                            None => vec![ClassificationOutcome::Failure(FailureReason::MissingImage)],
                        }
                    } else {
                        classifier.classify_batch(images).await
                    }
                }
            })
            .await;

        align(results.pop().unwrap_or_default(), len)
    }

    fn record(&self, images: usize) {
        if let Some(ref m) = self.metrics {
            m.record_batch_processed(images);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Label;
    use crate::test_utils::{FakeClassifier, FakeImageHost};

    fn dispatcher(
        host: Arc<FakeImageHost>,
        classifier: Arc<FakeClassifier>,
        chunk_size: usize,
        batch_size: usize,
    ) -> BatchDispatcher {
        BatchDispatcher::new(
            host,
            classifier,
            WorkerPools::new(8, 2),
            chunk_size,
            batch_size,
            Some(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_order_preserved_across_chunks_and_batches() {
        let urls: Vec<Option<String>> = (0..13)
            .map(|i| (i % 4 != 3).then(|| format!("http://img/{i}")))
            .collect();
        let good: Vec<String> = urls.iter().flatten().filter(|u| !u.ends_with("/5")).cloned().collect();
        let fronts: Vec<String> = ["http://img/0", "http://img/6", "http://img/12"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let host = Arc::new(FakeImageHost::with_good(good));
        let classifier = Arc::new(FakeClassifier::with_fronts(fronts.clone()));
        let dispatcher = dispatcher(host, Arc::clone(&classifier), 5, 2);

        let out = dispatcher.classify_urls(&urls).await;
        assert_eq!(out.len(), 13);

        for (i, (url, outcome)) in urls.iter().zip(&out).enumerate() {
            let expected = match url {
                None => ClassificationOutcome::Failure(FailureReason::MissingImage),
                Some(u) if u.ends_with("/5") => {
                    ClassificationOutcome::Failure(FailureReason::MissingImage)
                }
                Some(u) if fronts.contains(u) => ClassificationOutcome::Success(Label::Front),
                Some(_) => ClassificationOutcome::Success(Label::Back),
            };
            assert_eq!(outcome, &expected, "position {i}");
        }

        // Chunks of 5 split into batches of 2: 2+2+1, 2+2+1, 2+1
        assert_eq!(classifier.batch_sizes(), vec![2, 2, 1, 2, 2, 1, 2, 1]);
        assert_eq!(classifier.single_calls(), 0);
    }

    #[tokio::test]
    async fn test_small_input_classified_directly() {
        let host = Arc::new(FakeImageHost::with_good(["http://a", "http://b"]));
        let classifier = Arc::new(FakeClassifier::with_fronts(["http://b"]));
        let dispatcher = dispatcher(Arc::clone(&host), Arc::clone(&classifier), 50, 12);

        let one = dispatcher.classify_urls(&[Some("http://b".to_string())]).await;
        assert_eq!(one, vec![ClassificationOutcome::Success(Label::Front)]);
        assert_eq!(classifier.single_calls(), 1);

        let two = dispatcher
            .classify_urls(&[Some("http://a".to_string()), Some("http://b".to_string())])
            .await;
        assert_eq!(
            two,
            vec![
                ClassificationOutcome::Success(Label::Back),
                ClassificationOutcome::Success(Label::Front)
            ]
        );
        assert_eq!(classifier.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_single_missing_image_skips_classifier() {
        let host = Arc::new(FakeImageHost::default());
        let classifier = Arc::new(FakeClassifier::default());
        let dispatcher = dispatcher(host, Arc::clone(&classifier), 50, 12);

        let out = dispatcher.classify_urls(&[Some("http://gone".to_string())]).await;
        assert_eq!(out, vec![ClassificationOutcome::Failure(FailureReason::MissingImage)]);
        assert_eq!(classifier.single_calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_classifier_keeps_length() {
        let urls: Vec<Option<String>> = (0..7).map(|i| Some(format!("http://img/{i}"))).collect();
        let host = Arc::new(FakeImageHost::with_good(urls.iter().flatten().cloned()));
        let classifier = Arc::new(FakeClassifier::failing());
        let dispatcher = dispatcher(host, classifier, 4, 3);

        let out = dispatcher.classify_urls(&urls).await;
        assert_eq!(out.len(), 7);
        assert!(out.iter().all(|o| o.label().is_none()));
    }

    #[test]
    fn test_into_batches_and_align() {
        let batches = into_batches((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);

        let padded = align(vec![ClassificationOutcome::Success(Label::Back)], 2);
        assert_eq!(padded[1], ClassificationOutcome::Failure(FailureReason::MissingResult));
        let cut = align(vec![ClassificationOutcome::Success(Label::Back); 3], 1);
        assert_eq!(cut.len(), 1);
    }
}

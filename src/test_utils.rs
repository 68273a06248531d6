// In-process fakes for the network traits

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::types::{ClassificationOutcome, FailureReason, Label};
use crate::services::classifier::ImageClassifier;
use crate::services::images::ImageHost;

/// Image host where a fixed set of URLs exists.
///
/// Fetching a reachable URL returns the URL itself as the body, so a fake
/// classifier can recognise which image it was given.
#[derive(Default)]
pub struct FakeImageHost {
    good: HashSet<String>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeImageHost {
    pub fn with_good<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            good: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageHost for FakeImageHost {
    async fn probe(&self, url: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.good.contains(url)
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.good.contains(url).then(|| url.as_bytes().to_vec())
    }
}

/// Classifier that labels an image front when its bytes spell a known URL
#[derive(Default)]
pub struct FakeClassifier {
    fronts: HashSet<String>,
    fail_all: bool,
    single_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl FakeClassifier {
    pub fn with_fronts<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fronts: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Every request fails in transport
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the batch requests received, in arrival order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    fn label(&self, bytes: &[u8]) -> ClassificationOutcome {
        let key = String::from_utf8_lossy(bytes);
        if self.fronts.contains(key.as_ref()) {
            ClassificationOutcome::Success(Label::Front)
        } else {
            ClassificationOutcome::Success(Label::Back)
        }
    }
}

#[async_trait]
impl ImageClassifier for FakeClassifier {
    async fn classify_one(&self, image: Vec<u8>) -> ClassificationOutcome {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return ClassificationOutcome::transport("connection refused");
        }
        self.label(&image)
    }

    async fn classify_batch(&self, images: Vec<Option<Vec<u8>>>) -> Vec<ClassificationOutcome> {
        self.batch_sizes.lock().push(images.len());
        images
            .iter()
            .map(|image| match image {
                None => ClassificationOutcome::Failure(FailureReason::MissingImage),
                Some(_) if self.fail_all => ClassificationOutcome::transport("connection refused"),
                Some(bytes) => self.label(bytes),
            })
            .collect()
    }
}

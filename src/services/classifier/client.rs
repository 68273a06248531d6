use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::Config;
use crate::core::types::{ClassificationOutcome, FailureReason, Label};
use crate::utils::Metrics;

/// Remote front/back classification
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify_one(&self, image: Vec<u8>) -> ClassificationOutcome;

    /// One outcome per input position, whatever happens to the request.
    /// `None` inputs resolve to `Failure(MissingImage)` without being sent.
    async fn classify_batch(&self, images: Vec<Option<Vec<u8>>>) -> Vec<ClassificationOutcome>;
}

/// Client for the model service (`/predict`, `/predict_batch`)
pub struct HttpClassifier {
    endpoint: String,
    http_client: reqwest::Client,
    metrics: Option<Metrics>,
}

/// Map one response item to an outcome
fn outcome_from_item(item: &serde_json::Value) -> ClassificationOutcome {
    match item.get("result") {
        None | Some(serde_json::Value::Null) => {
            ClassificationOutcome::Failure(FailureReason::MissingResult)
        }
        Some(value) => match Label::from_wire(value) {
            Some(label) => ClassificationOutcome::Success(label),
            None => ClassificationOutcome::Failure(FailureReason::UnrecognisedLabel(
                value.to_string(),
            )),
        },
    }
}

/// Content type of an image payload, JPEG when the format is not recognised
fn image_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg")
}

fn image_part(index: usize, bytes: Vec<u8>) -> reqwest::Result<Part> {
    let mime = image_mime(&bytes);
    let ext = if mime == "image/png" { "png" } else { "jpg" };
    Part::bytes(bytes)
        .file_name(format!("image_{index}.{ext}"))
        .mime_str(mime)
}

/// Expand per-request results back over the original positions
fn scatter(
    total: usize,
    positions: &[usize],
    results: Vec<ClassificationOutcome>,
) -> Vec<ClassificationOutcome> {
    let mut out = vec![ClassificationOutcome::Failure(FailureReason::MissingImage); total];
    let mut results = results.into_iter();
    for &pos in positions {
        out[pos] = results
            .next()
            .unwrap_or(ClassificationOutcome::Failure(FailureReason::MissingResult));
    }
    out
}

impl HttpClassifier {
    pub fn new(config: &Config, metrics: Option<Metrics>) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.classifier_timeout())
            .pool_max_idle_per_host(config.compute_pool_size())
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            endpoint: config.classifier_endpoint().trim_end_matches('/').to_string(),
            http_client,
            metrics,
        })
    }

    fn record_call(&self, success: bool, started: Instant, images: usize) {
        if let Some(ref m) = self.metrics {
            m.record_classifier_call(success, started.elapsed(), images);
        }
    }

    async fn post_form(&self, path: &str, form: Form) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self.http_client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("classifier returned {}: {}", status, body);
        }

        Ok(response.json::<serde_json::Value>().await?)
    }

    async fn send_batch(&self, images: Vec<Vec<u8>>) -> anyhow::Result<Vec<ClassificationOutcome>> {
        let mut form = Form::new();
        for (i, bytes) in images.into_iter().enumerate() {
            form = form.part("files", image_part(i, bytes)?);
        }

        let body = self.post_form("predict_batch", form).await?;
        let items = body
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("batch response is not a JSON array"))?;

        Ok(items.iter().map(outcome_from_item).collect())
    }
}

#[async_trait]
impl ImageClassifier for HttpClassifier {
    #[instrument(skip_all, fields(bytes = image.len()))]
    async fn classify_one(&self, image: Vec<u8>) -> ClassificationOutcome {
        let started = Instant::now();

        let form = match image_part(0, image) {
            Ok(part) => Form::new().part("file", part),
            Err(e) => return ClassificationOutcome::transport(e),
        };

        let (outcome, delivered) = match self.post_form("predict", form).await {
            Ok(body) => (outcome_from_item(&body), true),
            Err(e) => {
                warn!("Single classification failed: {}", e);
                (ClassificationOutcome::transport(e), false)
            }
        };

        self.record_call(delivered, started, 1);
        outcome
    }

    #[instrument(skip_all, fields(batch_size = images.len()))]
    async fn classify_batch(&self, images: Vec<Option<Vec<u8>>>) -> Vec<ClassificationOutcome> {
        let total = images.len();
        let mut positions = Vec::with_capacity(total);
        let mut present = Vec::with_capacity(total);
        for (pos, image) in images.into_iter().enumerate() {
            if let Some(bytes) = image {
                positions.push(pos);
                present.push(bytes);
            }
        }

        if present.is_empty() {
            return scatter(total, &positions, Vec::new());
        }

        let sent = present.len();
        let started = Instant::now();
        let results = match self.send_batch(present).await {
            Ok(results) => {
                if results.len() != sent {
                    warn!(
                        "Classifier answered {} items for a batch of {}",
                        results.len(),
                        sent
                    );
                }
                self.record_call(true, started, sent);
                results
            }
            Err(e) => {
                warn!("Batch classification of {} images failed: {}", sent, e);
                self.record_call(false, started, sent);
                vec![ClassificationOutcome::transport(&e); sent]
            }
        };

        debug!("Classified batch of {} ({} sent)", total, sent);
        scatter(total, &positions, results)
    }
}

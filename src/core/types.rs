// Shared domain types for the cleanup pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One of the four canonical product image positions.
///
/// Slot 1 is the display ("front") slot by convention, not by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageSlot(u8);

impl ImageSlot {
    pub const FRONT: ImageSlot = ImageSlot(1);
    pub const ALL: [ImageSlot; 4] = [ImageSlot(1), ImageSlot(2), ImageSlot(3), ImageSlot(4)];

    pub fn new(slot: u8) -> Option<Self> {
        (1..=4).contains(&slot).then_some(Self(slot))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn is_front(self) -> bool {
        self == Self::FRONT
    }

    /// Table column holding this slot's URL
    pub fn column(self) -> String {
        format!("image_{}", self.0)
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary front/back label returned by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Wire value `"0"`
    Back,
    /// Wire value `"1"`
    Front,
}

impl Label {
    /// Parse the `result` field of a classifier response.
    ///
    /// The service answers with a string; a bare integer is accepted too.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => match s.trim() {
                "0" => Some(Label::Back),
                "1" => Some(Label::Front),
                _ => None,
            },
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(0) => Some(Label::Back),
                Some(1) => Some(Label::Front),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Label::Back => "0",
            Label::Front => "1",
        }
    }
}

/// Why an image ended up without a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No bytes were available for this position (unreachable or invalid URL)
    MissingImage,
    /// The request carrying this image failed as a whole
    Transport(String),
    /// The response had no `result` for this position
    MissingResult,
    /// The response carried a label outside {"0", "1"}
    UnrecognisedLabel(String),
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Success(Label),
    Failure(FailureReason),
}

impl ClassificationOutcome {
    pub fn label(&self) -> Option<Label> {
        match self {
            ClassificationOutcome::Success(label) => Some(*label),
            ClassificationOutcome::Failure(_) => None,
        }
    }

    pub fn is_front(&self) -> bool {
        self.label() == Some(Label::Front)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClassificationOutcome::Success(_))
    }

    pub fn transport(err: impl fmt::Display) -> Self {
        ClassificationOutcome::Failure(FailureReason::Transport(err.to_string()))
    }
}

/// Body of `POST /cleanup`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupRequest {
    /// Key of the source table
    pub source: String,
    /// Key of the table written after URL cleanup
    pub url_output: String,
    /// Key of the table written after image cleanup
    pub image_output: String,
}

/// Body of the single-stage triggers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageRequest {
    pub source: String,
    pub output: String,
}

/// Immediate acknowledgement returned by the triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupAck {
    pub status: String,
    pub stage: String,
    pub source: String,
    pub outputs: Vec<String>,
}

/// Which half of the pipeline a report describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Urls,
    Images,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Urls => write!(f, "url"),
            Stage::Images => write!(f, "image"),
        }
    }
}

/// Counters produced by URL validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub total: usize,
    pub cache_hits: usize,
    pub probed: usize,
    pub reachable: usize,
    pub rejected: usize,
}

impl ValidationStats {
    pub fn merge(&mut self, other: &ValidationStats) {
        self.total += other.total;
        self.cache_hits += other.cache_hits;
        self.probed += other.probed;
        self.reachable += other.reachable;
        self.rejected += other.rejected;
    }
}

/// Summary of one pipeline stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub source: String,
    pub output: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub urls_derived: usize,
    pub validation: ValidationStats,
    pub fronts_found: usize,
    pub fronts_moved: usize,
    pub rows_cleared: usize,
    pub rows_dropped: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl StageReport {
    pub fn new(stage: Stage, source: &str, output: &str) -> Self {
        Self {
            stage,
            source: source.to_string(),
            output: output.to_string(),
            rows_in: 0,
            rows_out: 0,
            urls_derived: 0,
            validation: ValidationStats::default(),
            fronts_found: 0,
            fronts_moved: 0,
            rows_cleared: 0,
            rows_dropped: 0,
            elapsed: Duration::ZERO,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

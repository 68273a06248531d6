// Custom error types for the cleanup pipeline
//
// Per-item network and response failures are not errors here: they degrade
// to `None` / `ClassificationOutcome::Failure` at the call site. These enums
// cover what can actually stop a stage or the process.

use thiserror::Error;

/// Configuration errors (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No classifier endpoint configured (set CLASSIFIER_URL environment variable)")]
    MissingClassifierUrl,

    #[error("Invalid URL for {name}: {value} (expected http:// or https://)")]
    InvalidUrl { name: &'static str, value: String },

    #[error("{name} must be > 0, got {value}")]
    InvalidSize { name: &'static str, value: usize },

    #[error("{name} must be between 1 and {max} seconds, got {value}")]
    InvalidTimeout {
        name: &'static str,
        value: u64,
        max: u64,
    },

    #[error("Invalid storage config: {0}")]
    InvalidStorage(String),
}

/// Blob store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Tab-separated table decoding errors
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Table has no header row")]
    Empty,

    #[error("Table is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Row on line {line} has {found} fields, header has {expected}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load table {key}: {source}")]
    TableLoad {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to parse table {key}: {source}")]
    TableParse {
        key: String,
        #[source]
        source: TableError,
    },

    #[error("Failed to save table {key}: {source}")]
    TableSave {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to persist URL cache: {0}")]
    CacheSave(#[source] StorageError),

    #[error("Table is missing required column: {0}")]
    MissingColumn(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type TableResult<T> = Result<T, TableError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

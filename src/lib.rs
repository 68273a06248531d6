// Library exports for the product image cleanup pipeline

pub mod core;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use core::{
    config::Config,
    errors::{ConfigError, PipelineError, StorageError, TableError},
    table::ProductTable,
    types::{ClassificationOutcome, CleanupAck, CleanupRequest, Label, Stage, StageReport, StageRequest},
};

pub use orchestration::{CleanupOrchestrator, WorkerPools};

pub use services::{HttpClassifier, HttpImageHost, LocalBlobStore, UrlCache, UrlValidator};

pub use utils::Metrics;

pub mod config;
pub mod errors;
pub mod table;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, PipelineError, StorageError, TableError};
pub use table::ProductTable;
pub use types::{
    ClassificationOutcome, CleanupAck, CleanupRequest, FailureReason, ImageSlot, Label, Stage,
    StageReport, StageRequest, ValidationStats,
};

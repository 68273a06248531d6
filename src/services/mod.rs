pub mod classifier;
pub mod images;
pub mod storage;
pub mod validation;

// Re-export commonly used services
pub use classifier::{BatchDispatcher, HttpClassifier, ImageClassifier};
pub use images::{HttpImageHost, ImageHost, ImageUrlDeriver};
pub use storage::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use validation::{UrlCache, UrlCacheSnapshot, UrlValidator};

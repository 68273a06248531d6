pub mod client;
pub mod dispatcher;

pub use client::{HttpClassifier, ImageClassifier};
pub use dispatcher::BatchDispatcher;

pub mod image_stage;
pub mod url_stage;

pub use image_stage::{drop_rows_without_front, FrontImageReassigner, ReassignmentReport};
pub use url_stage::{UrlCleaner, UrlStageReport};

pub mod host;
pub mod url;

pub use host::{HttpImageHost, ImageHost};
pub use url::{product_path, ImageUrlDeriver};

pub mod cache;
pub mod validator;

pub use cache::{UrlCache, UrlCacheSnapshot};
pub use validator::UrlValidator;

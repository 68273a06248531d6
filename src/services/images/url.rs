use crate::core::config::Config;
use crate::core::types::ImageSlot;

/// Codes up to this length are used verbatim as a single path segment
const SHORT_CODE_MAX_LEN: usize = 8;
/// Long codes are zero-padded to EAN-13 length before being split
const PADDED_CODE_LEN: usize = 13;

/// Product folder below the image base URL.
///
/// `"12345"` stays `"12345"`; `"3017620422003"` becomes
/// `"301/762/042/2003"`; `"123456789"` is padded to `"0000123456789"` first.
/// Returns `None` for an empty or non-ASCII code.
pub fn product_path(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() || !code.is_ascii() {
        return None;
    }
    if code.len() <= SHORT_CODE_MAX_LEN {
        return Some(code.to_string());
    }

    let padded = format!("{:0>width$}", code, width = PADDED_CODE_LEN);
    // Codes longer than 13 keep everything after the third group in the last segment
    let (a, rest) = padded.split_at(3);
    let (b, rest) = rest.split_at(3);
    let (c, d) = rest.split_at(3);
    Some(format!("{a}/{b}/{c}/{d}"))
}

/// Maps product codes to canonical image URLs
#[derive(Debug, Clone)]
pub struct ImageUrlDeriver {
    base_url: String,
    resolution: Option<String>,
}

impl ImageUrlDeriver {
    pub fn new(base_url: impl Into<String>, resolution: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            resolution,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.image_base_url(),
            config.image_resolution().map(str::to_string),
        )
    }

    pub fn derive(&self, code: &str, slot: ImageSlot) -> Option<String> {
        let path = product_path(code)?;
        let file = match &self.resolution {
            Some(res) => format!("{}.{}.jpg", slot.number(), res),
            None => format!("{}.jpg", slot.number()),
        };
        Some(format!("{}/{}/{}", self.base_url, path, file))
    }
}

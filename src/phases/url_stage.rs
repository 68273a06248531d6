// URL stage: derive the four image URLs of every product and drop the dead ones

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::table::{ProductTable, CODE_COLUMN};
use crate::core::types::{ImageSlot, ValidationStats};
use crate::services::images::ImageUrlDeriver;
use crate::services::validation::UrlValidator;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UrlStageReport {
    pub urls_derived: usize,
    pub validation: ValidationStats,
}

/// Rewrites `image_1..image_4` from the product code, then nulls every URL
/// the validator rejects.
pub struct UrlCleaner {
    deriver: ImageUrlDeriver,
    validator: Arc<UrlValidator>,
}

impl UrlCleaner {
    pub fn new(deriver: ImageUrlDeriver, validator: Arc<UrlValidator>) -> Self {
        Self { deriver, validator }
    }

    #[instrument(skip_all, fields(rows = table.len()))]
    pub async fn run(&self, table: &mut ProductTable) -> PipelineResult<UrlStageReport> {
        if !table.has_column(CODE_COLUMN) {
            return Err(PipelineError::MissingColumn(CODE_COLUMN.to_string()));
        }
        table.ensure_image_columns();

        let rows = table.len();
        if rows == 0 {
            return Ok(UrlStageReport::default());
        }

        // Slot-major: all image_1 URLs, then all image_2 URLs, ...
        let mut urls: Vec<Option<String>> = Vec::with_capacity(rows * ImageSlot::ALL.len());
        for slot in ImageSlot::ALL {
            for row in 0..rows {
                urls.push(table.code(row).and_then(|code| self.deriver.derive(code, slot)));
            }
        }
        let urls_derived = urls.iter().filter(|u| u.is_some()).count();

        // One pass over every column so duplicates and cache hits are shared
        let (valid, validation) = self.validator.validate_with_stats(&urls).await;

        for (i, url) in valid.into_iter().enumerate() {
            table.set_image(i % rows, ImageSlot::ALL[i / rows], url);
        }

        info!(
            "URL cleanup: {} derived, {} reachable, {} cache hits, {} probed",
            urls_derived, validation.reachable, validation.cache_hits, validation.probed
        );

        Ok(UrlStageReport {
            urls_derived,
            validation,
        })
    }
}

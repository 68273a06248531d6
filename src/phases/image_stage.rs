// Image stage: move a verified front image into slot 1

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::table::ProductTable;
use crate::core::types::{ImageSlot, ValidationStats};
use crate::services::classifier::BatchDispatcher;
use crate::services::validation::UrlValidator;
use crate::utils::Metrics;

/// What one reassignment pass did to a table
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReassignmentReport {
    pub fronts_found: usize,
    /// Fronts found outside slot 1 and swapped into it
    pub fronts_moved: usize,
    /// Rows that ended with all four slots nulled
    pub rows_cleared: usize,
    pub validation: ValidationStats,
}

/// Walks slots 1 to 4, validating and classifying the slot URL of every row
/// that has no front yet.
///
/// A front in slot `s` is swapped with slot 1 and the row leaves the pending
/// set. Rows still pending after slot 4 lose all four images, so every row
/// ends either with `image_1` set or with no images at all.
pub struct FrontImageReassigner {
    validator: Arc<UrlValidator>,
    dispatcher: Arc<BatchDispatcher>,
    metrics: Option<Metrics>,
}

impl FrontImageReassigner {
    pub fn new(
        validator: Arc<UrlValidator>,
        dispatcher: Arc<BatchDispatcher>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            validator,
            dispatcher,
            metrics,
        }
    }

    #[instrument(skip_all, fields(rows = table.len()))]
    pub async fn run(&self, table: &mut ProductTable) -> ReassignmentReport {
        let mut report = ReassignmentReport::default();
        table.ensure_image_columns();

        let mut pending: Vec<usize> = (0..table.len()).collect();

        for slot in ImageSlot::ALL {
            if pending.is_empty() {
                break;
            }

            let urls = table.images_at(&pending, slot);
            let (valid, stats) = self.validator.validate_with_stats(&urls).await;
            report.validation.merge(&stats);

            // Unreachable URLs do not survive in the table
            for (&row, (before, after)) in pending.iter().zip(urls.iter().zip(&valid)) {
                if before.is_some() && after.is_none() {
                    table.set_image(row, slot, None);
                }
            }

            let outcomes = self.dispatcher.classify_urls(&valid).await;

            let mut still_pending = Vec::with_capacity(pending.len());
            let mut found = 0;
            for (&row, outcome) in pending.iter().zip(&outcomes) {
                if outcome.is_front() {
                    found += 1;
                    if !slot.is_front() {
                        table.swap_images(row, ImageSlot::FRONT, slot);
                        report.fronts_moved += 1;
                    }
                } else {
                    still_pending.push(row);
                }
            }

            debug!(
                "Slot {}: {} checked, {} fronts, {} still pending",
                slot,
                pending.len(),
                found,
                still_pending.len()
            );
            report.fronts_found += found;
            pending = still_pending;
        }

        for &row in &pending {
            table.clear_images(row);
        }
        report.rows_cleared = pending.len();

        if let Some(ref m) = self.metrics {
            m.record_fronts_found(report.fronts_found);
        }

        info!(
            "Reassignment: {} fronts ({} moved), {} rows without front",
            report.fronts_found, report.fronts_moved, report.rows_cleared
        );
        report
    }
}

/// Remove every row whose `image_1` is null; returns the number removed
pub fn drop_rows_without_front(table: &mut ProductTable) -> usize {
    table.retain_rows(|t, row| t.image(row, ImageSlot::FRONT).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::pools::{WorkerPool, WorkerPools};
    use crate::services::validation::UrlCache;
    use crate::test_utils::{FakeClassifier, FakeImageHost};

    fn table(rows: &[[&str; 5]]) -> ProductTable {
        let columns = ["code", "image_1", "image_2", "image_3", "image_4"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut table = ProductTable::new(columns).unwrap();
        for row in rows {
            table.push_row(row.iter().map(|v| v.to_string()).collect());
        }
        table
    }

    fn reassigner(host: FakeImageHost, classifier: FakeClassifier) -> FrontImageReassigner {
        let host = Arc::new(host);
        let pools = WorkerPools::new(4, 2);
        let validator = UrlValidator::new(
            host.clone(),
            UrlCache::new(),
            WorkerPool::new("io", 4),
            10,
            None,
        );
        let dispatcher = BatchDispatcher::new(host, Arc::new(classifier), pools, 4, 2, None);
        FrontImageReassigner::new(Arc::new(validator), Arc::new(dispatcher), None)
    }

    fn assert_terminal(table: &ProductTable) {
        for row in 0..table.len() {
            let any = ImageSlot::ALL.iter().any(|&s| table.image(row, s).is_some());
            assert!(
                table.image(row, ImageSlot::FRONT).is_some() || !any,
                "row {row} has images but no front"
            );
        }
    }

    #[tokio::test]
    async fn test_front_in_slot_three_is_swapped() {
        let mut t = table(&[["1", "http://a1", "http://a2", "http://a3", "http://a4"]]);
        let host = FakeImageHost::with_good(["http://a1", "http://a2", "http://a3", "http://a4"]);
        let r = reassigner(host, FakeClassifier::with_fronts(["http://a3"]));

        let report = r.run(&mut t).await;
        assert_eq!(t.image(0, ImageSlot::FRONT), Some("http://a3"));
        assert_eq!(t.image(0, ImageSlot::new(3).unwrap()), Some("http://a1"));
        assert_eq!(report.fronts_found, 1);
        assert_eq!(report.fronts_moved, 1);
        assert_eq!(report.rows_cleared, 0);
    }

    #[tokio::test]
    async fn test_all_back_clears_and_drops() {
        let mut t = table(&[["1", "http://b1", "http://b2", "http://b3", "http://b4"]]);
        let host = FakeImageHost::with_good(["http://b1", "http://b2", "http://b3", "http://b4"]);
        let r = reassigner(host, FakeClassifier::default());

        let report = r.run(&mut t).await;
        for slot in ImageSlot::ALL {
            assert_eq!(t.image(0, slot), None);
        }
        assert_eq!(report.rows_cleared, 1);
        assert_eq!(drop_rows_without_front(&mut t), 1);
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_rows_reach_terminal_state() {
        let mut t = table(&[
            // Front already in slot 1
            ["1", "http://f", "http://x", "", ""],
            // Unreachable slot 1, front in slot 2
            ["2", "http://dead", "http://g", "", ""],
            // Nothing reachable
            ["3", "http://dead2", "", "", "not a url"],
            // Only slot 4 set and it is the front
            ["4", "", "", "", "http://h"],
        ]);
        let host = FakeImageHost::with_good(["http://f", "http://x", "http://g", "http://h"]);
        let r = reassigner(host, FakeClassifier::with_fronts(["http://f", "http://g", "http://h"]));

        let report = r.run(&mut t).await;
        assert_terminal(&t);
        assert_eq!(report.fronts_found, 3);
        assert_eq!(report.fronts_moved, 2);

        assert_eq!(t.image(0, ImageSlot::FRONT), Some("http://f"));
        assert_eq!(t.image(0, ImageSlot::new(2).unwrap()), Some("http://x"));
        assert_eq!(t.image(1, ImageSlot::FRONT), Some("http://g"));
        // The dead URL was nulled before the swap
        assert_eq!(t.image(1, ImageSlot::new(2).unwrap()), None);
        assert_eq!(t.image(3, ImageSlot::FRONT), Some("http://h"));

        assert_eq!(drop_rows_without_front(&mut t), 1);
        assert_eq!(t.len(), 3);
        assert_eq!(t.code(2), Some("4"));
    }

    #[tokio::test]
    async fn test_failing_classifier_clears_every_row() {
        let mut t = table(&[
            ["1", "http://a", "", "", ""],
            ["2", "http://b", "http://c", "", ""],
        ]);
        let host = FakeImageHost::with_good(["http://a", "http://b", "http://c"]);
        let r = reassigner(host, FakeClassifier::failing());

        let report = r.run(&mut t).await;
        assert_terminal(&t);
        assert_eq!(report.rows_cleared, 2);
        assert_eq!(report.fronts_found, 0);
    }
}

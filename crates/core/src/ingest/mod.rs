//! Feed ingestion: split lines, locate columns, normalise rows into records.
//!
//! Ingestion never fails. A missing or ambiguous header falls back to the positional
//! layout, malformed rows are dropped and counted, and unparseable cells get defaults.

mod locator;
mod normalizer;
mod splitter;

pub use locator::{ColumnMap, FieldLayout, locate_fields};
pub use normalizer::{
    EMPTY_CODE, EMPTY_DESCRIPTION, MISSING_CODE, MISSING_DESCRIPTION, Normalized, normalize,
};
pub use splitter::{feed_lines, split_line};

use rand::Rng;

use crate::classify::Classifier;
use crate::record::InventoryRecord;

pub const DEFAULT_HEADER_SCAN_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub header_scan_lines: usize,
    pub classifier: Classifier,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            header_scan_lines: DEFAULT_HEADER_SCAN_LINES,
            classifier: Classifier::default(),
        }
    }
}

#[derive(Debug)]
pub struct IngestOutcome {
    pub records: Vec<InventoryRecord>,
    /// Every category the records reference, first-seen order.
    pub new_categories: Vec<String>,
    /// Every non-default location the records reference, first-seen order.
    pub new_locations: Vec<String>,
    pub layout: FieldLayout,
    pub dropped_rows: usize,
    /// blake3 hex digest of the raw feed.
    pub digest: String,
}

pub fn ingest(raw: &str, opts: &IngestOptions) -> IngestOutcome {
    ingest_with_rng(raw, opts, &mut rand::thread_rng())
}

pub fn ingest_with_rng<R: Rng + ?Sized>(
    raw: &str,
    opts: &IngestOptions,
    rng: &mut R,
) -> IngestOutcome {
    let lines = feed_lines(raw);
    let layout = locate_fields(&lines, opts.header_scan_lines);
    let normalized = normalize(&lines, &layout, &opts.classifier, rng);

    IngestOutcome {
        records: normalized.records,
        new_categories: normalized.new_categories.into_iter().collect(),
        new_locations: normalized.new_locations.into_iter().collect(),
        layout,
        dropped_rows: normalized.dropped_rows,
        digest: feed_digest(raw),
    }
}

pub fn feed_digest(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    const SAMPLE: &str = "Qty,Code,Item Description\r\n\
2,(AC) 315143,BLOWER MOTOR TOYOTA UNSER/AVANZA (RL)\r\n\
0,(AC)2850,CABIN FILTER TOYOTA INNOVA/ESTIMA\r\n\
\r\n\
-2,0986AB8001C,BRAKE PUMP (R) PERODUA MYVI INC L.C-BOSCH\r\n\
58,9004K-10000,AUTO TRANS FLUID ATF PERODUA D3-SP\r\n";

    #[test]
    fn sample_feed() {
        let out = ingest_with_rng(SAMPLE, &IngestOptions::default(), &mut StdRng::seed_from_u64(1));
        assert_eq!(out.layout.header_line, Some(0));
        assert_eq!(out.records.len(), 4);
        assert_eq!(out.dropped_rows, 0);
        let categories: Vec<&str> = out.records.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(
            categories,
            vec!["Other/Hardware", "Cabin Filter", "Brakes", "Fluids & Oils"]
        );
        assert_eq!(out.new_categories.len(), 4);
        assert_eq!(out.records[2].quantity, -2);
        assert_eq!(out.digest, feed_digest(SAMPLE));
        assert_eq!(out.digest.len(), 64);
    }

    #[test]
    fn ids_are_unique_per_row() {
        let raw = "1,A,X\n1,A,X\n1,A,X";
        let out = ingest(raw, &IngestOptions::default());
        let mut ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn empty_feed_yields_nothing() {
        let out = ingest("\n\r\n  \n", &IngestOptions::default());
        assert!(out.records.is_empty());
        assert_eq!(out.layout, FieldLayout::positional());
    }
}

use indexmap::IndexSet;
use rand::Rng;

use super::locator::FieldLayout;
use super::splitter::split_line;
use crate::classify::Classifier;
use crate::field_value::quantity_from_text;
use crate::ids::RecordId;
use crate::record::{InventoryRecord, UNASSIGNED};

pub const MISSING_CODE: &str = "N/A";
pub const MISSING_DESCRIPTION: &str = "No Description";
pub const EMPTY_CODE: &str = "UNKNOWN";
pub const EMPTY_DESCRIPTION: &str = "Untitled Part";

/// Typed rows plus every label they reference, in first-seen order.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<InventoryRecord>,
    pub new_categories: IndexSet<String>,
    pub new_locations: IndexSet<String>,
    pub dropped_rows: usize,
}

/// Turn the data lines of a feed into records. Never fails: rows with fewer than two
/// fields are dropped and counted, every other row produces a record.
pub fn normalize<R: Rng + ?Sized>(
    lines: &[&str],
    layout: &FieldLayout,
    classifier: &Classifier,
    rng: &mut R,
) -> Normalized {
    let columns = layout.columns;
    let mut out = Normalized::default();

    for (position, line) in lines.iter().enumerate().skip(layout.first_data_line()) {
        let tokens = split_line(line);
        if tokens.len() < 2 {
            out.dropped_rows += 1;
            continue;
        }
        let cell = |column: Option<usize>| column.map(|i| tokens.get(i).map_or("", String::as_str));

        let quantity = cell(columns.quantity)
            .and_then(quantity_from_text)
            .unwrap_or(0);
        let code = text_or(cell(columns.code), MISSING_CODE, EMPTY_CODE);
        let description = text_or(cell(columns.description), MISSING_DESCRIPTION, EMPTY_DESCRIPTION);

        let category = match labelled(cell(columns.category)) {
            Some(label) => label.to_string(),
            None => classifier.classify(&description).to_string(),
        };
        out.new_categories.insert(category.clone());

        let location_primary = location(cell(columns.location_primary), &mut out.new_locations);
        let location_secondary = location(cell(columns.location_secondary), &mut out.new_locations);

        out.records.push(InventoryRecord {
            id: RecordId::for_ingested(&code, position, rng),
            code,
            description,
            quantity,
            category,
            location_primary,
            location_secondary,
            updated_at: None,
        });
    }
    out
}

fn text_or(cell: Option<&str>, missing: &str, empty: &str) -> String {
    match cell {
        None => missing.to_string(),
        Some("") => empty.to_string(),
        Some(value) => value.to_string(),
    }
}

/// A usable label from an optional column: non-blank and not the literal `null`.
fn labelled(cell: Option<&str>) -> Option<&str> {
    cell.filter(|v| !v.trim().is_empty() && !v.trim().eq_ignore_ascii_case("null"))
}

fn location(cell: Option<&str>, seen: &mut IndexSet<String>) -> String {
    match labelled(cell) {
        Some(label) if label != UNASSIGNED => {
            seen.insert(label.to_string());
            label.to_string()
        }
        _ => UNASSIGNED.to_string(),
    }
}

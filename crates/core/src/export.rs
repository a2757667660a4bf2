//! Flat CSV export that the ingestion pipeline reads back unchanged.

use crate::record::InventoryRecord;

pub const EXPORT_HEADER: &str = "Quantity,Code,Description,Category,Zone 1,Zone 2";

/// One header line, then one line per record. Text cells are double-quoted; the line
/// splitter has no escape syntax, so embedded `"` become `'`.
pub fn flat_csv<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a InventoryRecord>,
{
    let mut out = String::from(EXPORT_HEADER);
    for record in records {
        out.push('\n');
        out.push_str(&record.quantity.to_string());
        for text in [
            &record.code,
            &record.description,
            &record.category,
            &record.location_primary,
            &record.location_secondary,
        ] {
            out.push_str(",\"");
            out.push_str(&text.replace('"', "'"));
            out.push('"');
        }
    }
    out.push('\n');
    out
}

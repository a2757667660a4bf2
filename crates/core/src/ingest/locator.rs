//! Header detection for feeds of unknown shape.

use super::splitter::split_line;

const LOCATION_MARKERS: [&str; 3] = ["2", "two", "secondary"];

/// Column index per role. `None` means the feed has no such column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub quantity: Option<usize>,
    pub code: Option<usize>,
    pub description: Option<usize>,
    pub category: Option<usize>,
    pub location_primary: Option<usize>,
    pub location_secondary: Option<usize>,
}

impl ColumnMap {
    /// Layout assumed when no header is recognised.
    pub const POSITIONAL: ColumnMap = ColumnMap {
        quantity: Some(0),
        code: Some(1),
        description: Some(2),
        category: None,
        location_primary: None,
        location_secondary: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Index (into the non-blank lines) of the header, if one was found.
    pub header_line: Option<usize>,
    pub columns: ColumnMap,
}

impl FieldLayout {
    pub fn positional() -> Self {
        Self {
            header_line: None,
            columns: ColumnMap::POSITIONAL,
        }
    }

    /// Index of the first data line.
    pub fn first_data_line(&self) -> usize {
        self.header_line.map_or(0, |h| h + 1)
    }
}

/// Scan up to `scan_lines` lines for a header. The first line on which at least two of
/// quantity/code/description land on distinct columns wins; within a line the first
/// matching token wins per role.
pub fn locate_fields(lines: &[&str], scan_lines: usize) -> FieldLayout {
    for (index, line) in lines.iter().take(scan_lines).enumerate() {
        let tokens: Vec<String> = split_line(line)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        let columns = roles_for(&tokens);
        if qualifies(&columns) {
            return FieldLayout {
                header_line: Some(index),
                columns,
            };
        }
    }
    FieldLayout::positional()
}

fn roles_for(tokens: &[String]) -> ColumnMap {
    let is_location = |t: &str| t.contains("zone") || t.contains("location");
    let has_marker = |t: &str| LOCATION_MARKERS.iter().any(|m| t.contains(m));

    ColumnMap {
        quantity: position(tokens, |t| t.contains("qty") || t.contains("quantity") || t == "q"),
        code: position(tokens, |t| t.contains("code") || t.contains("part") || t.contains("sku")),
        description: position(tokens, |t| {
            t.contains("desc") || t.contains("item") || t.contains("name")
        }),
        category: position(tokens, |t| {
            t.contains("category") || t.contains("type") || t.contains("group") || t == "cat"
        }),
        location_primary: position(tokens, |t| is_location(t) && !has_marker(t)),
        location_secondary: position(tokens, |t| is_location(t) && has_marker(t)),
    }
}

fn position(tokens: &[String], pred: impl Fn(&str) -> bool) -> Option<usize> {
    tokens.iter().position(|t| pred(t.as_str()))
}

fn qualifies(columns: &ColumnMap) -> bool {
    let found = [columns.quantity, columns.code, columns.description];
    found.iter().enumerate().any(|(i, a)| {
        found[i + 1..]
            .iter()
            .any(|b| matches!((a, b), (Some(x), Some(y)) if x != y))
    })
}

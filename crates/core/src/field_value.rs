use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Editable columns of an inventory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Quantity,
    Code,
    Description,
    Category,
    LocationPrimary,
    LocationSecondary,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Quantity,
        Field::Code,
        Field::Description,
        Field::Category,
        Field::LocationPrimary,
        Field::LocationSecondary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quantity => "qty",
            Self::Code => "code",
            Self::Description => "description",
            Self::Category => "category",
            Self::LocationPrimary => "zone",
            Self::LocationSecondary => "zone2",
        }
    }

    /// Fields whose values are drawn from a catalog.
    pub fn is_location(&self) -> bool {
        matches!(self, Self::LocationPrimary | Self::LocationSecondary)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qty" | "quantity" => Ok(Self::Quantity),
            "code" => Ok(Self::Code),
            "description" | "desc" => Ok(Self::Description),
            "category" => Ok(Self::Category),
            "zone" | "location" | "location_primary" => Ok(Self::LocationPrimary),
            "zone2" | "location_secondary" => Ok(Self::LocationSecondary),
            _ => Err(CoreError::UnknownField(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// Quantity from a free-text token: every character other than digits and `-` is
/// dropped, then the leading signed integer is read. `None` when nothing parses.
pub fn quantity_from_text(token: &str) -> Option<i64> {
    let stripped: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    leading_integer(&stripped)
}

fn leading_integer(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let digits: &str = &digits[..digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len())];
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.parse::<i64>().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

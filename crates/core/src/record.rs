use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{Field, FieldValue, quantity_from_text};
use crate::hlc::Hlc;
use crate::ids::RecordId;

/// Default label for an unplaced item.
pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: RecordId,
    pub code: String,
    pub description: String,
    /// Zero or negative is a stock alert, not an error.
    pub quantity: i64,
    pub category: String,
    pub location_primary: String,
    pub location_secondary: String,
    /// Assigned by the authoritative store on each accepted write. `None` until then.
    pub updated_at: Option<Hlc>,
}

impl InventoryRecord {
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Quantity => FieldValue::Integer(self.quantity),
            Field::Code => FieldValue::Text(self.code.clone()),
            Field::Description => FieldValue::Text(self.description.clone()),
            Field::Category => FieldValue::Text(self.category.clone()),
            Field::LocationPrimary => FieldValue::Text(self.location_primary.clone()),
            Field::LocationSecondary => FieldValue::Text(self.location_secondary.clone()),
        }
    }

    /// Assign a field, coercing the value to the field's type. Returns the value actually
    /// stored.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<FieldValue, CoreError> {
        let value = coerce(field, value)?;
        let text = match (field, &value) {
            (Field::Quantity, FieldValue::Integer(n)) => {
                self.quantity = *n;
                return Ok(value);
            }
            (_, other) => other.to_string(),
        };
        match field {
            Field::Quantity => {}
            Field::Code => self.code = text,
            Field::Description => self.description = text,
            Field::Category => self.category = text,
            Field::LocationPrimary => self.location_primary = text,
            Field::LocationSecondary => self.location_secondary = text,
        }
        Ok(value)
    }

    pub fn is_stock_alert(&self) -> bool {
        self.quantity <= 0
    }

    /// True when `query` (case-insensitive) occurs in the code or description.
    pub fn matches_text(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.code.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
    }
}

/// Normalise a value for `field`: quantities become integers, text is trimmed, blank
/// locations fall back to [`UNASSIGNED`].
pub fn coerce(field: Field, value: FieldValue) -> Result<FieldValue, CoreError> {
    let invalid = |value: &FieldValue| CoreError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    };
    match field {
        Field::Quantity => match value {
            FieldValue::Integer(n) => Ok(FieldValue::Integer(n)),
            FieldValue::Text(ref s) => quantity_from_text(s)
                .map(FieldValue::Integer)
                .ok_or_else(|| invalid(&value)),
        },
        Field::LocationPrimary | Field::LocationSecondary => {
            let text = value.to_string();
            let text = text.trim();
            Ok(FieldValue::Text(if text.is_empty() {
                UNASSIGNED.to_string()
            } else {
                text.to_string()
            }))
        }
        Field::Category => {
            let text = value.to_string();
            if text.trim().is_empty() {
                return Err(invalid(&value));
            }
            Ok(FieldValue::Text(text.trim().to_string()))
        }
        Field::Code | Field::Description => Ok(FieldValue::Text(value.to_string().trim().to_string())),
    }
}

/// Input for a hand-created record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub code: String,
    pub description: String,
    pub quantity: i64,
    pub category: String,
    pub location_primary: String,
    pub location_secondary: String,
}

impl Default for RecordDraft {
    fn default() -> Self {
        Self {
            code: String::new(),
            description: String::new(),
            quantity: 0,
            category: String::new(),
            location_primary: UNASSIGNED.to_string(),
            location_secondary: UNASSIGNED.to_string(),
        }
    }
}

impl RecordDraft {
    pub fn into_record(self, id: RecordId) -> InventoryRecord {
        InventoryRecord {
            id,
            code: self.code,
            description: self.description,
            quantity: self.quantity,
            category: self.category,
            location_primary: self.location_primary,
            location_secondary: self.location_secondary,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InventoryRecord {
        RecordDraft {
            code: "GDB7707".into(),
            description: "BRAKE PAD (F) PROTON SAGA".into(),
            quantity: 6,
            category: "Brakes".into(),
            ..Default::default()
        }
        .into_record(RecordId::from("r1"))
    }

    #[test]
    fn set_coerces_quantity_text() {
        let mut r = record();
        let stored = r.set(Field::Quantity, "-3".into()).unwrap();
        assert_eq!(stored, FieldValue::Integer(-3));
        assert_eq!(r.quantity, -3);
        assert!(r.is_stock_alert());
    }

    #[test]
    fn set_rejects_unparseable_quantity() {
        let mut r = record();
        let err = r.set(Field::Quantity, "lots".into()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
        assert_eq!(r.quantity, 6);
    }

    #[test]
    fn blank_location_becomes_unassigned() {
        let mut r = record();
        r.set(Field::LocationPrimary, "Rack A".into()).unwrap();
        assert_eq!(r.location_primary, "Rack A");
        r.set(Field::LocationPrimary, "  ".into()).unwrap();
        assert_eq!(r.location_primary, UNASSIGNED);
    }

    #[test]
    fn blank_category_rejected() {
        let mut r = record();
        assert!(r.set(Field::Category, "".into()).is_err());
        assert_eq!(r.category, "Brakes");
    }

    #[test]
    fn get_reflects_set() {
        let mut r = record();
        r.set(Field::Code, " 17220-RNA-000 ".into()).unwrap();
        assert_eq!(r.get(Field::Code), FieldValue::Text("17220-RNA-000".into()));
        assert!(r.matches_text("rna"));
        assert!(r.matches_text("brake"));
        assert!(!r.matches_text("wiper"));
    }
}

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::RecordId;
use crate::record::InventoryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification broadcast by the authoritative store. `Update` events always
/// carry the store-assigned `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: InventoryRecord,
}

impl ChangeEvent {
    pub fn insert(record: InventoryRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
        }
    }

    pub fn update(record: InventoryRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
        }
    }

    pub fn delete(record: InventoryRecord) -> Self {
        Self {
            kind: ChangeKind::Delete,
            record,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record.id
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlc::Hlc;
    use crate::record::RecordDraft;

    #[test]
    fn frame_carries_store_timestamp() {
        let mut record = RecordDraft {
            code: "A608A1".into(),
            description: "IGNITION COIL PLUG".into(),
            quantity: 2,
            category: "Ignition (Plugs/Coils)".into(),
            ..Default::default()
        }
        .into_record(RecordId::from("A608A1-16-abc"));
        record.updated_at = Some(Hlc::new(1_700_000_000_000, 3));

        let event = ChangeEvent::update(record);
        let decoded = ChangeEvent::from_msgpack(&event.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded.kind, ChangeKind::Update);
        assert_eq!(decoded.record.updated_at, Some(Hlc::new(1_700_000_000_000, 3)));
        assert_eq!(decoded, event);
    }

    #[test]
    fn garbage_frame_is_an_error() {
        assert!(matches!(
            ChangeEvent::from_msgpack(&[0xc1, 0x00]),
            Err(CoreError::Serialization(_))
        ));
    }
}

pub mod catalog;
pub mod classify;
pub mod error;
pub mod event;
pub mod export;
pub mod field_value;
pub mod hlc;
pub mod ids;
pub mod ingest;
pub mod record;

pub use catalog::Catalog;
pub use classify::Classifier;
pub use error::CoreError;
pub use event::{ChangeEvent, ChangeKind};
pub use field_value::{Field, FieldValue};
pub use hlc::{Hlc, HlcClock};
pub use ids::RecordId;
pub use ingest::{IngestOptions, IngestOutcome, ingest};
pub use record::{InventoryRecord, RecordDraft, UNASSIGNED};

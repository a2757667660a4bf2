use partsync_core::{CoreError, Field, RecordId};
use partsync_storage::StoreError;
use thiserror::Error;

/// A write the store refused. Carried on the failure channel for debounced writes and
/// inside [`EngineError::BulkWriteFailed`] for awaited ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub record_id: RecordId,
    /// Fields whose optimistic values were rolled back.
    pub fields: Vec<Field>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: Field, value: String },

    #[error("persist failed for {id}: {reason}")]
    PersistFailed {
        id: RecordId,
        fields: Vec<Field>,
        reason: String,
    },

    #[error("{count} writes failed", count = .failures.len())]
    BulkWriteFailed { failures: Vec<MutationFailure> },

    #[error("bulk replace failed: {0}")]
    BulkReplaceFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no async runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl From<MutationFailure> for EngineError {
    fn from(failure: MutationFailure) -> Self {
        EngineError::PersistFailed {
            id: failure.record_id,
            fields: failure.fields,
            reason: failure.reason,
        }
    }
}

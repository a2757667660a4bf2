use std::sync::Arc;

use tracing::{debug, trace};

use partsync_core::{ChangeEvent, ChangeKind};

use crate::cache::{CacheState, Shared};

/// What applying one change event did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// The id was already cached; the event was ignored.
    DuplicateInsert,
    Updated,
    /// A local edit newer than the event is pending; the event was ignored.
    StaleEcho,
    Deleted,
    /// The id was not cached; only its pending state was cleared.
    UnknownDelete,
}

impl MergeOutcome {
    pub fn changed_cache(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }
}

/// Applies store change events to the cache, consulting pending markers so a stale echo
/// never reverts a newer local edit.
#[derive(Debug, Clone)]
pub struct ChangeFeedMerger {
    shared: Arc<Shared>,
}

impl ChangeFeedMerger {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn apply(&self, event: ChangeEvent) -> MergeOutcome {
        let outcome = merge(&mut self.shared.lock(), event);
        if outcome.changed_cache() {
            self.shared.bump();
        }
        outcome
    }
}

fn merge(state: &mut CacheState, event: ChangeEvent) -> MergeOutcome {
    state.observe(event.record.updated_at);
    let ChangeEvent { kind, record } = event;
    let id = record.id.clone();

    match kind {
        ChangeKind::Insert => {
            if state.records.contains_key(&id) {
                trace!(%id, "duplicate insert ignored");
                return MergeOutcome::DuplicateInsert;
            }
            state.adopt_labels(&record);
            state.records.insert(id, record);
            MergeOutcome::Inserted
        }
        ChangeKind::Update => {
            if state.pending.is_superseding(&id, record.updated_at) {
                debug!(
                    %id,
                    pending = ?state.pending.get(&id),
                    remote = ?record.updated_at,
                    "stale echo discarded"
                );
                return MergeOutcome::StaleEcho;
            }
            state.pending.clear(&id);
            state.debounce.cancel(&id);
            state.adopt_labels(&record);
            state.records.insert(id, record);
            MergeOutcome::Updated
        }
        ChangeKind::Delete => {
            state.pending.clear(&id);
            state.debounce.cancel(&id);
            if state.records.shift_remove(&id).is_some() {
                MergeOutcome::Deleted
            } else {
                MergeOutcome::UnknownDelete
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use partsync_core::{Hlc, InventoryRecord, RecordDraft, RecordId};

    use super::*;

    fn record(quantity: i64, stamp: Hlc) -> InventoryRecord {
        let mut record = RecordDraft {
            code: "GDB7707".into(),
            quantity,
            category: "Brakes".into(),
            ..Default::default()
        }
        .into_record(RecordId::from("x"));
        record.updated_at = Some(stamp);
        record
    }

    fn merger() -> (ChangeFeedMerger, Arc<Shared>) {
        let shared = Arc::new(Shared::new());
        (ChangeFeedMerger::new(shared.clone()), shared)
    }

    #[test]
    fn insert_is_idempotent() {
        let (merger, shared) = merger();
        assert_eq!(merger.apply(ChangeEvent::insert(record(1, Hlc::new(5, 0)))), MergeOutcome::Inserted);
        assert_eq!(
            merger.apply(ChangeEvent::insert(record(9, Hlc::new(6, 0)))),
            MergeOutcome::DuplicateInsert
        );
        let state = shared.lock();
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].quantity, 1);
        assert!(state.categories.contains("Brakes"));
    }

    #[test]
    fn update_older_than_pending_is_discarded() {
        let (merger, shared) = merger();
        merger.apply(ChangeEvent::insert(record(1, Hlc::new(5, 0))));
        {
            let mut state = shared.lock();
            state.records[0].quantity = -3;
            state.pending.mark(RecordId::from("x"), Hlc::new(100, 0));
        }

        assert_eq!(
            merger.apply(ChangeEvent::update(record(5, Hlc::new(99, 7)))),
            MergeOutcome::StaleEcho
        );
        assert_eq!(shared.lock().records[0].quantity, -3);

        assert_eq!(
            merger.apply(ChangeEvent::update(record(5, Hlc::new(100, 0)))),
            MergeOutcome::Updated
        );
        let state = shared.lock();
        assert_eq!(state.records[0].quantity, 5);
        assert_eq!(state.pending.get(&RecordId::from("x")), None);
    }

    #[test]
    fn out_of_order_updates_without_pending_take_last_applied() {
        let (merger, shared) = merger();
        merger.apply(ChangeEvent::update(record(2, Hlc::new(20, 0))));
        merger.apply(ChangeEvent::update(record(1, Hlc::new(10, 0))));
        // No pending marker: the store is authoritative and each update overwrites.
        assert_eq!(shared.lock().records[0].quantity, 1);
    }

    #[test]
    fn delete_clears_pending() {
        let (merger, shared) = merger();
        merger.apply(ChangeEvent::insert(record(1, Hlc::new(5, 0))));
        shared.lock().pending.mark(RecordId::from("x"), Hlc::new(100, 0));

        assert_eq!(merger.apply(ChangeEvent::delete(record(1, Hlc::new(5, 0)))), MergeOutcome::Deleted);
        assert_eq!(
            merger.apply(ChangeEvent::delete(record(1, Hlc::new(5, 0)))),
            MergeOutcome::UnknownDelete
        );
        let state = shared.lock();
        assert!(state.records.is_empty());
        assert_eq!(state.pending.len(), 0);
    }

    #[test]
    fn observed_stamps_advance_client_clock() {
        let (merger, shared) = merger();
        let ahead = Hlc::new(shared.lock().clock.tick().unwrap().wall_ms() + 10_000, 3);
        merger.apply(ChangeEvent::insert(record(1, ahead)));
        assert!(shared.lock().clock.tick().unwrap() > ahead);
    }

    #[test]
    fn applying_bumps_revision_only_on_change() {
        let (merger, shared) = merger();
        let changes = shared.changes();
        merger.apply(ChangeEvent::insert(record(1, Hlc::new(5, 0))));
        assert_eq!(*changes.borrow(), 1);
        merger.apply(ChangeEvent::insert(record(1, Hlc::new(5, 0))));
        assert_eq!(*changes.borrow(), 1);
    }
}

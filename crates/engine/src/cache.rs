use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use partsync_core::{Catalog, Field, FieldValue, Hlc, HlcClock, InventoryRecord, RecordId, UNASSIGNED};
use partsync_storage::Snapshot;

use crate::debounce::DebounceTable;
use crate::error::MutationFailure;
use crate::pending::PendingTable;

const FAILURE_CAPACITY: usize = 256;

/// Everything the coordinator and merger mutate. Only ever touched under [`Shared::lock`].
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub records: IndexMap<RecordId, InventoryRecord>,
    pub categories: Catalog,
    pub locations: Catalog,
    pub pending: PendingTable,
    pub debounce: DebounceTable,
    pub clock: HlcClock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ResyncStats {
    pub records: usize,
    pub kept_local: usize,
    pub dropped: usize,
}

impl CacheState {
    /// Fold an observed store stamp into the client clock. A stamp too far ahead is
    /// logged; the caller still applies the event.
    pub fn observe(&mut self, stamp: Option<Hlc>) {
        if let Some(stamp) = stamp {
            if let Err(e) = self.clock.receive(stamp) {
                warn!(%stamp, error = %e, "remote stamp not merged into clock");
            }
        }
    }

    /// Add a label assigned to `field` to its catalog. Returns true if it was new.
    pub fn adopt_label(&mut self, field: Field, value: &FieldValue) -> bool {
        let Some(label) = value.as_text() else {
            return false;
        };
        match field {
            Field::Category => self.categories.insert(label),
            Field::LocationPrimary | Field::LocationSecondary if label != UNASSIGNED => {
                self.locations.insert(label)
            }
            _ => false,
        }
    }

    pub fn adopt_labels(&mut self, record: &InventoryRecord) {
        self.categories.insert(record.category.as_str());
        for location in [&record.location_primary, &record.location_secondary] {
            if location != UNASSIGNED {
                self.locations.insert(location.as_str());
            }
        }
    }

    /// Replace the cache with a full fetch. A local record survives only while its
    /// pending marker is newer than the fetched copy, or, if the store no longer has it,
    /// while any marker exists.
    pub fn reconcile(&mut self, snapshot: Snapshot) -> ResyncStats {
        self.categories.extend(snapshot.categories);
        self.locations.extend(snapshot.locations);

        let mut stats = ResyncStats::default();
        let mut next = IndexMap::with_capacity(snapshot.records.len());
        for remote in snapshot.records {
            self.observe(remote.updated_at);
            let id = remote.id.clone();
            let record = match self.records.swap_remove(&id) {
                Some(local) if self.pending.is_superseding(&id, remote.updated_at) => {
                    stats.kept_local += 1;
                    local
                }
                _ => {
                    self.pending.clear(&id);
                    remote
                }
            };
            self.adopt_labels(&record);
            next.insert(id, record);
        }

        for (id, local) in std::mem::take(&mut self.records) {
            if self.pending.get(&id).is_some() {
                stats.kept_local += 1;
                next.insert(id, local);
            } else {
                self.debounce.cancel(&id);
                stats.dropped += 1;
            }
        }
        stats.records = next.len();
        self.records = next;
        stats
    }
}

/// The cache plus its notification channels.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<CacheState>,
    revision: watch::Sender<u64>,
    failures: broadcast::Sender<MutationFailure>,
}

impl Shared {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        let (failures, _) = broadcast::channel(FAILURE_CAPACITY);
        Self {
            state: Mutex::new(CacheState::default()),
            revision,
            failures,
        }
    }

    /// Critical sections never leave the state half-written, so a poisoned lock is
    /// still consistent.
    pub fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal that the cache changed.
    pub fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub fn report(&self, failure: MutationFailure) {
        // No listeners is fine; the failure is logged where it happened.
        let _ = self.failures.send(failure);
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn failures(&self) -> broadcast::Receiver<MutationFailure> {
        self.failures.subscribe()
    }
}

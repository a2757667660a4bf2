//! Optimistic edits: apply locally, write through to the store, roll back on failure.
//!
//! Field edits are debounced per record; the stepper and bulk edits write at once. Every
//! edit marks the record pending with a fresh client stamp. A successful write leaves the
//! marker in place; only the feed's confirming event clears it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use partsync_core::record::coerce;
use partsync_core::{CoreError, Field, FieldValue, InventoryRecord, RecordDraft, RecordId, UNASSIGNED};
use partsync_storage::RemoteStore;

use crate::cache::{CacheState, Shared};
use crate::debounce::Originals;
use crate::error::{EngineError, MutationFailure};

/// A record snapshot on its way to the store.
#[derive(Debug)]
struct Write {
    id: RecordId,
    record: InventoryRecord,
    originals: Originals,
    /// Pending sequence number of the newest edit the snapshot contains.
    seq: u64,
}

pub struct MutationCoordinator<S> {
    shared: Arc<Shared>,
    store: Arc<S>,
    debounce: Duration,
}

impl<S> Clone for MutationCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            store: Arc::clone(&self.store),
            debounce: self.debounce,
        }
    }
}

impl<S: RemoteStore> MutationCoordinator<S> {
    pub(crate) fn new(shared: Arc<Shared>, store: Arc<S>, debounce: Duration) -> Self {
        Self {
            shared,
            store,
            debounce,
        }
    }

    /// Apply an edit to the cache now and (re)start the record's debounce timer. The
    /// write carries the whole record as it stands when the timer fires.
    ///
    /// Fails with [`EngineError::NoRuntime`] outside a tokio runtime, before touching the cache.
    pub fn set_field(&self, id: &RecordId, field: Field, value: FieldValue) -> Result<(), EngineError> {
        let value = coerce_for(field, value)?;
        let runtime = Handle::try_current()?;
        {
            let mut state = self.shared.lock();
            let previous = state
                .records
                .get(id)
                .map(|record| record.get(field))
                .ok_or_else(|| EngineError::RecordNotFound(id.clone()))?;
            let stamp = state.clock.tick()?;

            if state.adopt_label(field, &value) {
                info!(%field, label = %value, "catalog grew");
            }
            if let Some(record) = state.records.get_mut(id) {
                record.set(field, value)?;
            }
            state.pending.mark(id.clone(), stamp);

            let generation = state.debounce.reschedule(id.clone(), field, previous);
            let handle = self.spawn_debounced(&runtime, id.clone(), generation);
            state.debounce.attach(id, generation, handle);
        }
        debug!(%id, %field, "edit applied; write scheduled");
        self.shared.bump();
        Ok(())
    }

    /// Apply one value to many records and write each independently and concurrently.
    /// Failed records are rolled back and reported together; the rest keep the value.
    /// Unknown ids are skipped. Returns the number of records written.
    #[instrument(level = "debug", skip(self, ids, value), fields(count = ids.len()))]
    pub async fn bulk_set_field(
        &self,
        ids: &[RecordId],
        field: Field,
        value: FieldValue,
    ) -> Result<usize, EngineError> {
        let value = coerce_for(field, value)?;
        let writes = {
            let mut state = self.shared.lock();
            if state.adopt_label(field, &value) {
                info!(%field, label = %value, "catalog grew");
            }
            let mut writes = Vec::with_capacity(ids.len());
            for id in ids.iter().collect::<IndexSet<_>>() {
                let Some(previous) = state.records.get(id).map(|record| record.get(field)) else {
                    warn!(%id, "bulk edit skips unknown record");
                    continue;
                };
                let stamp = state.clock.tick()?;
                let Some(record) = state.records.get_mut(id) else {
                    continue;
                };
                record.set(field, value.clone())?;
                let record = record.clone();

                let mut originals = state.debounce.cancel(id).unwrap_or_default();
                originals.entry(field).or_insert(previous);
                let seq = state.pending.mark(id.clone(), stamp);
                writes.push(Write {
                    id: id.clone(),
                    record,
                    originals,
                    seq,
                });
            }
            writes
        };
        self.shared.bump();

        let written = writes.len();
        let failures = self.write_all(writes).await;
        if failures.is_empty() {
            info!(written, %field, "bulk edit written");
            Ok(written)
        } else {
            warn!(failed = failures.len(), written, %field, "bulk edit partially failed");
            Err(EngineError::BulkWriteFailed { failures })
        }
    }

    /// Stepper: add `delta` to the quantity and write immediately. Decrements floor at
    /// zero. Returns the new quantity.
    pub async fn adjust_quantity(&self, id: &RecordId, delta: i64) -> Result<i64, EngineError> {
        let write = {
            let mut state = self.shared.lock();
            let stamp = state.clock.tick()?;
            let record = state
                .records
                .get_mut(id)
                .ok_or_else(|| EngineError::RecordNotFound(id.clone()))?;
            let previous = record.quantity;
            let stepped = previous.saturating_add(delta);
            record.quantity = if delta < 0 { stepped.max(0) } else { stepped };
            let record = record.clone();

            // An open debounce window rides along with this write.
            let mut originals = state.debounce.cancel(id).unwrap_or_default();
            originals
                .entry(Field::Quantity)
                .or_insert(FieldValue::Integer(previous));
            let seq = state.pending.mark(id.clone(), stamp);
            Write {
                id: id.clone(),
                record,
                originals,
                seq,
            }
        };
        self.shared.bump();

        let quantity = write.record.quantity;
        self.write_through(write).await?;
        Ok(quantity)
    }

    /// Create a record by hand. Not optimistic: the record enters the cache once the
    /// store has accepted it.
    #[instrument(level = "debug", skip_all, fields(code = %draft.code))]
    pub async fn create_record(&self, draft: RecordDraft) -> Result<InventoryRecord, EngineError> {
        let mut record = draft.into_record(RecordId::new());
        for field in Field::ALL {
            let value = coerce_for(field, record.get(field))?;
            record.set(field, value)?;
        }

        {
            let mut state = self.shared.lock();
            state.adopt_labels(&record);
        }
        self.store.upsert_category(record.category.clone()).await?;
        for location in [&record.location_primary, &record.location_secondary] {
            if location != UNASSIGNED {
                self.store.upsert_location(location.clone()).await?;
            }
        }

        let accepted = self.store.upsert(record).await?;
        {
            let mut state = self.shared.lock();
            state.observe(accepted.updated_at);
            state.records.insert(accepted.id.clone(), accepted.clone());
        }
        self.shared.bump();
        info!(id = %accepted.id, "record created");
        Ok(accepted)
    }

    /// Add a category label. Returns true if it was new locally.
    pub async fn add_category(&self, name: &str) -> Result<bool, EngineError> {
        let name = label_for(Field::Category, name)?;
        let added = self.shared.lock().categories.insert(name.as_str());
        if added {
            self.shared.bump();
        }
        self.store.upsert_category(name).await?;
        Ok(added)
    }

    /// Add a location label. Returns true if it was new locally.
    pub async fn add_location(&self, name: &str) -> Result<bool, EngineError> {
        let name = label_for(Field::LocationPrimary, name)?;
        let added = self.shared.lock().locations.insert(name.as_str());
        if added {
            self.shared.bump();
        }
        self.store.upsert_location(name).await?;
        Ok(added)
    }

    /// Fire every open debounce window now and wait for the writes.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let writes: Vec<Write> = {
            let mut state = self.shared.lock();
            let windows = state.debounce.drain();
            windows
                .into_iter()
                .filter_map(|(id, originals)| prepare(&state, id, originals))
                .collect()
        };
        if writes.is_empty() {
            return Ok(());
        }

        let failures = self.write_all(writes).await;
        for failure in &failures {
            self.shared.report(failure.clone());
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::BulkWriteFailed { failures })
        }
    }

    fn spawn_debounced(&self, runtime: &Handle, id: RecordId, generation: u64) -> JoinHandle<()> {
        let this = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(this.debounce).await;
            let write = {
                let mut state = this.shared.lock();
                match state.debounce.take_if_current(&id, generation) {
                    Some(originals) => prepare(&state, id, originals),
                    None => None,
                }
            };
            if let Some(write) = write {
                if let Err(failure) = this.write_through(write).await {
                    this.shared.report(failure);
                }
            }
        })
    }

    async fn write_all(&self, writes: Vec<Write>) -> Vec<MutationFailure> {
        let mut outstanding = HashMap::with_capacity(writes.len());
        let mut tasks = JoinSet::new();
        for write in writes {
            outstanding.insert(write.id.clone(), (write.seq, write.originals.clone()));
            let this = self.clone();
            tasks.spawn(async move {
                let id = write.id.clone();
                (id, this.write_through(write).await)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    outstanding.remove(&id);
                    if let Err(failure) = result {
                        failures.push(failure);
                    }
                }
                Err(e) => warn!(error = %e, "write task did not complete"),
            }
        }
        for (id, (seq, originals)) in outstanding {
            failures.push(self.roll_back(id, seq, originals, "write task did not complete".into()));
        }
        failures
    }

    /// Catalog labels first, then the record.
    #[instrument(level = "debug", skip_all, fields(id = %write.id))]
    async fn write_through(&self, write: Write) -> Result<InventoryRecord, MutationFailure> {
        for (field, label) in catalog_labels(&write) {
            let result = match field {
                Field::Category => self.store.upsert_category(label).await,
                _ => self.store.upsert_location(label).await,
            };
            if let Err(e) = result {
                return Err(self.roll_back(write.id, write.seq, write.originals, e.to_string()));
            }
        }

        match self.store.upsert(write.record).await {
            Ok(accepted) => {
                if let Some(stamp) = accepted.updated_at {
                    let mut state = self.shared.lock();
                    state.observe(Some(stamp));
                    state.pending.acknowledge(&write.id, write.seq, stamp);
                }
                debug!(updated_at = ?accepted.updated_at, "write accepted");
                Ok(accepted)
            }
            Err(e) => Err(self.roll_back(write.id, write.seq, write.originals, e.to_string())),
        }
    }

    /// Undo a failed write's optimistic values.
    ///
    /// Fields an open debounce window also touched hand their pre-edit values to that
    /// window. The cache is only restored while this write still owns the record: a
    /// newer write in flight, or a remote change the merger accepted, keeps its values.
    fn roll_back(&self, id: RecordId, seq: u64, originals: Originals, reason: String) -> MutationFailure {
        let fields: Vec<Field> = originals.keys().copied().collect();
        {
            let mut state = self.shared.lock();
            let window_open = state.debounce.is_scheduled(&id);
            let inherited = state.debounce.inherit(&id, &originals);
            let owns = state.pending.seq(&id) == Some(seq);

            if window_open || owns {
                if let Some(record) = state.records.get_mut(&id) {
                    for (field, value) in originals {
                        if inherited.contains(&field) {
                            continue;
                        }
                        if let Err(e) = record.set(field, value) {
                            warn!(%id, %field, error = %e, "pre-edit value no longer valid");
                        }
                    }
                }
            }
            if owns && !window_open {
                state.pending.clear(&id);
            }
        }
        self.shared.bump();
        warn!(%id, ?fields, %reason, "write failed; optimistic values rolled back");
        MutationFailure {
            record_id: id,
            fields,
            reason,
        }
    }
}

fn prepare(state: &CacheState, id: RecordId, originals: Originals) -> Option<Write> {
    let record = state.records.get(&id)?.clone();
    let seq = state.pending.seq(&id).unwrap_or_default();
    Some(Write {
        id,
        record,
        originals,
        seq,
    })
}

fn catalog_labels(write: &Write) -> Vec<(Field, String)> {
    write
        .originals
        .keys()
        .filter(|field| **field == Field::Category || field.is_location())
        .filter_map(|field| {
            let label = write.record.get(*field).to_string();
            (label != UNASSIGNED).then_some((*field, label))
        })
        .collect()
}

fn coerce_for(field: Field, value: FieldValue) -> Result<FieldValue, EngineError> {
    coerce(field, value).map_err(|e| match e {
        CoreError::InvalidValue { value, .. } => EngineError::InvalidValue { field, value },
        other => EngineError::Core(other),
    })
}

fn label_for(field: Field, name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() || name == UNASSIGNED {
        return Err(EngineError::InvalidValue {
            field,
            value: name.to_string(),
        });
    }
    Ok(name.to_string())
}

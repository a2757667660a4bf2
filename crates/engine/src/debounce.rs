//! Scheduled-write table: at most one outstanding debounce task per record.

use std::collections::{BTreeMap, HashMap};

use partsync_core::{Field, FieldValue, RecordId};
use tokio::task::JoinHandle;

/// Pre-edit values of every field touched in the current window.
pub(crate) type Originals = BTreeMap<Field, FieldValue>;

#[derive(Debug)]
struct Entry {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    originals: Originals,
}

#[derive(Debug, Default)]
pub(crate) struct DebounceTable {
    entries: HashMap<RecordId, Entry>,
    next_generation: u64,
}

impl DebounceTable {
    /// Open or extend the window for `id`. Any sleeping task is aborted; the first
    /// pre-edit value per field is kept. Returns the new generation.
    pub fn reschedule(&mut self, id: RecordId, field: Field, original: FieldValue) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let entry = self.entries.entry(id).or_insert_with(|| Entry {
            generation,
            handle: None,
            originals: Originals::new(),
        });
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        entry.generation = generation;
        entry.originals.entry(field).or_insert(original);
        generation
    }

    /// Store the task for `generation`, or abort it if the window has moved on.
    pub fn attach(&mut self, id: &RecordId, generation: u64, handle: JoinHandle<()>) {
        match self.entries.get_mut(id) {
            Some(entry) if entry.generation == generation => entry.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Close the window if `generation` is still current.
    pub fn take_if_current(&mut self, id: &RecordId, generation: u64) -> Option<Originals> {
        if self.entries.get(id)?.generation != generation {
            return None;
        }
        self.entries.remove(id).map(|entry| entry.originals)
    }

    /// Close the window now, aborting its task.
    pub fn cancel(&mut self, id: &RecordId) -> Option<Originals> {
        let mut entry = self.entries.remove(id)?;
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        Some(entry.originals)
    }

    /// Close every window, aborting their tasks.
    pub fn drain(&mut self) -> Vec<(RecordId, Originals)> {
        self.entries
            .drain()
            .map(|(id, mut entry)| {
                if let Some(handle) = entry.handle.take() {
                    handle.abort();
                }
                (id, entry.originals)
            })
            .collect()
    }

    /// Hand a failed write's pre-edit values to the open window for `id`, replacing the
    /// window's own for fields both touched. Returns the fields the window now owns.
    pub fn inherit(&mut self, id: &RecordId, originals: &Originals) -> Vec<Field> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Vec::new();
        };
        let overlapping: Vec<Field> = originals
            .keys()
            .filter(|field| entry.originals.contains_key(*field))
            .copied()
            .collect();
        for field in &overlapping {
            if let Some(value) = originals.get(field) {
                entry.originals.insert(*field, value.clone());
            }
        }
        overlapping
    }

    pub fn is_scheduled(&self, id: &RecordId) -> bool {
        self.entries.contains_key(id)
    }
}

//! Per-record markers for writes the store has not yet confirmed on the feed.

use std::collections::BTreeMap;

use partsync_core::{Hlc, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    stamp: Hlc,
    /// Edit sequence number; distinguishes edits that happen to share a stamp.
    seq: u64,
}

/// At most one marker per record. A new edit overwrites the old marker.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    markers: BTreeMap<RecordId, Marker>,
    next_seq: u64,
}

impl PendingTable {
    /// Record an edit issued at `stamp`. Returns its sequence number.
    pub fn mark(&mut self, id: RecordId, stamp: Hlc) -> u64 {
        self.next_seq += 1;
        self.markers.insert(
            id,
            Marker {
                stamp,
                seq: self.next_seq,
            },
        );
        self.next_seq
    }

    pub fn clear(&mut self, id: &RecordId) -> Option<Hlc> {
        self.markers.remove(id).map(|m| m.stamp)
    }

    pub fn clear_all(&mut self) {
        self.markers.clear();
    }

    pub fn get(&self, id: &RecordId) -> Option<Hlc> {
        self.markers.get(id).map(|m| m.stamp)
    }

    pub fn seq(&self, id: &RecordId) -> Option<u64> {
        self.markers.get(id).map(|m| m.seq)
    }

    /// True when a marker exists and is strictly newer than `updated_at`. An event
    /// without a stamp is older than any marker.
    pub fn is_superseding(&self, id: &RecordId, updated_at: Option<Hlc>) -> bool {
        match (self.get(id), updated_at) {
            (Some(pending), Some(remote)) => pending > remote,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// The store accepted the write snapshotted at edit `seq` and stamped it `accepted`.
    ///
    /// If that is still the latest edit, the marker moves onto the store's clock so the
    /// echo carrying `accepted` confirms it. If a newer edit exists, the marker is raised
    /// above `accepted` so the echo is recognised as stale.
    pub fn acknowledge(&mut self, id: &RecordId, seq: u64, accepted: Hlc) {
        let Some(marker) = self.markers.get_mut(id) else {
            return;
        };
        if marker.seq == seq {
            marker.stamp = accepted;
        } else if marker.seq > seq {
            let above = Hlc::new(accepted.wall_ms(), accepted.counter().saturating_add(1));
            marker.stamp = marker.stamp.max(above);
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }
}

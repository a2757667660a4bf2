use std::future::Future;

use partsync_core::{InventoryRecord, RecordId};

use crate::error::StoreError;
use crate::feed::ChangeFeed;

/// Everything a full fetch returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub records: Vec<InventoryRecord>,
    pub categories: Vec<String>,
    pub locations: Vec<String>,
}

/// The authoritative store as seen by a client.
///
/// Writes are idempotent by id (records) or name (catalog labels). Every accepted record
/// write is stamped by the store and announced on every [`ChangeFeed`]: `Insert` for a
/// new id, `Update` otherwise, `Delete` on removal.
pub trait RemoteStore: Send + Sync + 'static {
    /// Records in a stable order, `offset..offset + limit`, truncated to the row cap.
    fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<InventoryRecord>, StoreError>> + Send;

    fn fetch_categories(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn fetch_locations(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Largest page the store will return.
    fn row_cap(&self) -> usize {
        usize::MAX
    }

    /// Page through every record until a short page, then fetch both catalogs.
    fn fetch_all(&self, page_size: usize) -> impl Future<Output = Result<Snapshot, StoreError>> + Send {
        async move {
            let limit = page_size.min(self.row_cap()).max(1);
            let mut records = Vec::new();
            loop {
                let page = self.fetch_page(records.len(), limit).await?;
                let short = page.len() < limit;
                records.extend(page);
                if short {
                    break;
                }
            }
            Ok(Snapshot {
                records,
                categories: self.fetch_categories().await?,
                locations: self.fetch_locations().await?,
            })
        }
    }

    /// Write the full record. Returns it as accepted, carrying the store's `updated_at`.
    fn upsert(
        &self,
        record: InventoryRecord,
    ) -> impl Future<Output = Result<InventoryRecord, StoreError>> + Send;

    fn upsert_category(&self, name: String) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn upsert_location(&self, name: String) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, id: RecordId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace every record with `records` after adding the catalog labels. Returns the
    /// number of records written.
    fn replace_all(
        &self,
        records: Vec<InventoryRecord>,
        categories: Vec<String>,
        locations: Vec<String>,
        digest: String,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    fn subscribe(&self) -> ChangeFeed;
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use partsync_core::{InventoryRecord, RecordId};
use partsync_storage::{ChangeFeed, RemoteStore, StoreError};

/// Wraps a store, failing writes for chosen ids and recording every record write.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: Arc<S>,
    failing: Mutex<HashSet<RecordId>>,
    fail_replace: AtomicBool,
    upserts: Mutex<Vec<InventoryRecord>>,
    upsert_calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            fail_replace: AtomicBool::new(false),
            upserts: Mutex::new(Vec::new()),
            upsert_calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Refuse record writes for `id` until [`FlakyStore::heal`].
    pub fn fail(&self, id: &RecordId) {
        guard(&self.failing).insert(id.clone());
    }

    pub fn heal(&self, id: &RecordId) {
        guard(&self.failing).remove(id);
    }

    pub fn fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Delay every record write by `latency` before it reaches the inner store.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *guard(&self.latency) = latency;
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Every record write attempted, successful or not, in call order.
    pub fn upserts(&self) -> Vec<InventoryRecord> {
        guard(&self.upserts).clone()
    }

    fn is_failing(&self, id: &RecordId) -> bool {
        guard(&self.failing).contains(id)
    }
}

impl<S: RemoteStore> RemoteStore for FlakyStore<S> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<InventoryRecord>, StoreError> {
        self.inner.fetch_page(offset, limit).await
    }

    async fn fetch_categories(&self) -> Result<Vec<String>, StoreError> {
        self.inner.fetch_categories().await
    }

    async fn fetch_locations(&self) -> Result<Vec<String>, StoreError> {
        self.inner.fetch_locations().await
    }

    fn row_cap(&self) -> usize {
        self.inner.row_cap()
    }

    async fn upsert(&self, record: InventoryRecord) -> Result<InventoryRecord, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.upserts).push(record.clone());
        let latency = *guard(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.is_failing(&record.id) {
            debug!(id = %record.id, "refusing write");
            return Err(StoreError::Unavailable(format!("write refused for {}", record.id)));
        }
        self.inner.upsert(record).await
    }

    async fn upsert_category(&self, name: String) -> Result<(), StoreError> {
        self.inner.upsert_category(name).await
    }

    async fn upsert_location(&self, name: String) -> Result<(), StoreError> {
        self.inner.upsert_location(name).await
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn replace_all(
        &self,
        records: Vec<InventoryRecord>,
        categories: Vec<String>,
        locations: Vec<String>,
        digest: String,
    ) -> Result<usize, StoreError> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("bulk replace refused".into()));
        }
        self.inner.replace_all(records, categories, locations, digest).await
    }

    fn subscribe(&self) -> ChangeFeed {
        self.inner.subscribe()
    }
}

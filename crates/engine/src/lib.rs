//! Client-side cache of the parts inventory, kept in step with the authoritative store.
//!
//! [`Engine`] owns the cache. Edits are applied optimistically and written through by the
//! [`MutationCoordinator`]; store change events are folded in by the [`ChangeFeedMerger`].

mod cache;
pub mod config;
pub mod coordinator;
mod debounce;
pub mod error;
pub mod merger;
mod pending;

pub use config::EngineConfig;
pub use coordinator::MutationCoordinator;
pub use error::{EngineError, MutationFailure};
pub use merger::{ChangeFeedMerger, MergeOutcome};

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use partsync_core::ingest::IngestOptions;
use partsync_core::{ChangeEvent, Field, FieldValue, Hlc, InventoryRecord, RecordDraft, RecordId, ingest};
use partsync_storage::{FeedError, RemoteStore};

use crate::cache::Shared;

/// Result of a successful bulk ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub written: usize,
    pub dropped_rows: usize,
    /// Index of the recognised header line, `None` for positional layout.
    pub header_line: Option<usize>,
    pub new_categories: Vec<String>,
    pub new_locations: Vec<String>,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStat {
    pub name: String,
    pub count: usize,
    pub total_quantity: i64,
}

/// Keeps a feed pump running. Dropping the handle stops it.
#[derive(Debug)]
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Engine<S> {
    store: Arc<S>,
    shared: Arc<Shared>,
    coordinator: MutationCoordinator<S>,
    merger: ChangeFeedMerger,
    config: EngineConfig,
    ingest_options: IngestOptions,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            shared: Arc::clone(&self.shared),
            coordinator: self.coordinator.clone(),
            merger: self.merger.clone(),
            config: self.config.clone(),
            ingest_options: self.ingest_options.clone(),
        }
    }
}

impl<S: RemoteStore> Engine<S> {
    /// An engine with an empty cache. Call [`Engine::load`] to fill it.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let coordinator = MutationCoordinator::new(Arc::clone(&shared), Arc::clone(&store), config.debounce());
        Self {
            merger: ChangeFeedMerger::new(Arc::clone(&shared)),
            ingest_options: config.ingest_options(),
            store,
            shared,
            coordinator,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &MutationCoordinator<S> {
        &self.coordinator
    }

    pub fn merger(&self) -> &ChangeFeedMerger {
        &self.merger
    }

    /// Initial full fetch.
    pub async fn load(&self) -> Result<usize, EngineError> {
        self.resync().await
    }

    /// Full fetch reconciled against pending edits. Returns the cached record count.
    #[instrument(level = "debug", skip(self))]
    pub async fn resync(&self) -> Result<usize, EngineError> {
        let snapshot = self.store.fetch_all(self.config.engine.page_size).await?;
        let stats = self.shared.lock().reconcile(snapshot);
        self.shared.bump();
        info!(
            records = stats.records,
            kept_local = stats.kept_local,
            dropped = stats.dropped,
            "cache resynced"
        );
        Ok(stats.records)
    }

    /// Parse a raw feed and replace the store's contents with it.
    ///
    /// Catalog labels the feed introduces are added locally before the replace is issued.
    /// On failure the cache is refetched and `BulkReplaceFailed` returned.
    #[instrument(level = "debug", skip_all, fields(bytes = raw.len()))]
    pub async fn ingest(&self, raw: &str) -> Result<IngestReport, EngineError> {
        let outcome = ingest(raw, &self.ingest_options);
        info!(
            rows = outcome.records.len(),
            dropped = outcome.dropped_rows,
            header_line = ?outcome.layout.header_line,
            new_categories = outcome.new_categories.len(),
            new_locations = outcome.new_locations.len(),
            digest = %outcome.digest,
            "feed parsed"
        );

        {
            let mut state = self.shared.lock();
            state.categories.extend(outcome.new_categories.iter().cloned());
            state.locations.extend(outcome.new_locations.iter().cloned());
        }
        self.shared.bump();

        let report = IngestReport {
            written: 0,
            dropped_rows: outcome.dropped_rows,
            header_line: outcome.layout.header_line,
            new_categories: outcome.new_categories.clone(),
            new_locations: outcome.new_locations.clone(),
            digest: outcome.digest.clone(),
        };
        let written = match self
            .store
            .replace_all(
                outcome.records,
                outcome.new_categories,
                outcome.new_locations,
                outcome.digest,
            )
            .await
        {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "bulk replace failed; refetching");
                if let Err(resync) = self.resync().await {
                    warn!(error = %resync, "refetch after failed replace also failed");
                }
                return Err(EngineError::BulkReplaceFailed(e.to_string()));
            }
        };

        // Edits made against the old contents no longer refer to anything.
        {
            let mut state = self.shared.lock();
            state.pending.clear_all();
            state.debounce.drain();
        }
        self.resync().await?;
        Ok(IngestReport { written, ..report })
    }

    pub fn apply(&self, event: ChangeEvent) -> MergeOutcome {
        self.merger.apply(event)
    }

    /// Subscribe to the store's feed and apply every event as it arrives. A lagged or
    /// undecodable feed triggers a full resync; missed events are never replayed.
    pub fn attach_feed(&self) -> FeedHandle {
        let mut feed = self.store.subscribe();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        engine.merger.apply(event);
                    }
                    Err(FeedError::Closed) => {
                        info!("change feed closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "change feed interrupted; resyncing");
                        if let Err(e) = engine.resync().await {
                            warn!(error = %e, "resync failed");
                        }
                    }
                }
            }
        });
        FeedHandle { task }
    }

    pub fn set_field(&self, id: &RecordId, field: Field, value: impl Into<FieldValue>) -> Result<(), EngineError> {
        self.coordinator.set_field(id, field, value.into())
    }

    pub async fn bulk_set_field(
        &self,
        ids: &[RecordId],
        field: Field,
        value: impl Into<FieldValue>,
    ) -> Result<usize, EngineError> {
        self.coordinator.bulk_set_field(ids, field, value.into()).await
    }

    /// Stepper click: `+1`.
    pub async fn increment(&self, id: &RecordId) -> Result<i64, EngineError> {
        self.coordinator.adjust_quantity(id, 1).await
    }

    /// Stepper click: `-1`, never below zero.
    pub async fn decrement(&self, id: &RecordId) -> Result<i64, EngineError> {
        self.coordinator.adjust_quantity(id, -1).await
    }

    pub async fn adjust_quantity(&self, id: &RecordId, delta: i64) -> Result<i64, EngineError> {
        self.coordinator.adjust_quantity(id, delta).await
    }

    pub async fn create_record(&self, draft: RecordDraft) -> Result<InventoryRecord, EngineError> {
        self.coordinator.create_record(draft).await
    }

    pub async fn add_category(&self, name: &str) -> Result<bool, EngineError> {
        self.coordinator.add_category(name).await
    }

    pub async fn add_location(&self, name: &str) -> Result<bool, EngineError> {
        self.coordinator.add_location(name).await
    }

    pub async fn flush(&self) -> Result<(), EngineError> {
        self.coordinator.flush().await
    }
}

impl<S> Engine<S> {
    /// Cached records matching `pred`, in cache order.
    pub fn visible_records(&self, pred: impl Fn(&InventoryRecord) -> bool) -> Vec<InventoryRecord> {
        self.shared
            .lock()
            .records
            .values()
            .filter(|&record| pred(record))
            .cloned()
            .collect()
    }

    pub fn record(&self, id: &RecordId) -> Option<InventoryRecord> {
        self.shared.lock().records.get(id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.shared.lock().records.len()
    }

    pub fn categories(&self) -> Vec<String> {
        self.shared.lock().categories.to_vec()
    }

    pub fn locations(&self) -> Vec<String> {
        self.shared.lock().locations.to_vec()
    }

    /// Per-category counts, most populated first. Ties keep first-seen order.
    pub fn category_stats(&self) -> Vec<CategoryStat> {
        let mut stats: IndexMap<String, CategoryStat> = IndexMap::new();
        for record in self.shared.lock().records.values() {
            let stat = stats
                .entry(record.category.clone())
                .or_insert_with(|| CategoryStat {
                    name: record.category.clone(),
                    count: 0,
                    total_quantity: 0,
                });
            stat.count += 1;
            stat.total_quantity = stat.total_quantity.saturating_add(record.quantity);
        }
        let mut stats: Vec<CategoryStat> = stats.into_values().collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }

    /// Records at or below zero quantity.
    pub fn stock_alerts(&self) -> Vec<InventoryRecord> {
        self.visible_records(InventoryRecord::is_stock_alert)
    }

    /// Revision counter bumped on every cache change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes()
    }

    /// Failures of debounced writes, which have no caller to return to.
    pub fn failures(&self) -> broadcast::Receiver<MutationFailure> {
        self.shared.failures()
    }

    /// Records with an edit the feed has not yet confirmed.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Stamp of the unconfirmed local edit for `id`, if any.
    pub fn pending_since(&self, id: &RecordId) -> Option<Hlc> {
        self.shared.lock().pending.get(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use partsync_core::classify::OTHER;
    use partsync_storage::SqliteStore;

    use super::*;

    async fn engine() -> Engine<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = Engine::new(store, EngineConfig::default());
        engine.load().await.unwrap();
        engine
    }

    fn by_code(engine: &Engine<SqliteStore>, code: &str) -> InventoryRecord {
        engine
            .visible_records(|r| r.code == code)
            .into_iter()
            .next()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_headerless_line() {
        let engine = engine().await;
        let report = engine
            .ingest("2,(AC) 315143,BLOWER MOTOR TOYOTA UNSER/AVANZA (RL)\n")
            .await
            .unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.header_line, None);

        let record = by_code(&engine, "(AC) 315143");
        assert_eq!(record.quantity, 2);
        assert_eq!(record.description, "BLOWER MOTOR TOYOTA UNSER/AVANZA (RL)");
        assert_eq!(record.category, OTHER);
        assert!(record.updated_at.is_some());
        assert_eq!(engine.store().record_count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_passes_category_through() {
        let engine = engine().await;
        let report = engine
            .ingest("Qty,Code,Description,Category\n0,03C115561J,03C115561J (UNKNOWN DESC),Unknown\n")
            .await
            .unwrap();
        assert_eq!(report.header_line, Some(0));
        assert_eq!(report.new_categories, vec!["Unknown"]);
        assert!(engine.categories().contains(&"Unknown".to_string()));

        let record = by_code(&engine, "03C115561J");
        assert_eq!(record.category, "Unknown");
        assert_eq!(engine.stock_alerts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_edit_is_written_once_window_closes() {
        let engine = engine().await;
        engine.ingest("1,GDB7707,BRAKE PAD\n").await.unwrap();
        let id = by_code(&engine, "GDB7707").id;

        engine.set_field(&id, Field::Quantity, "4").unwrap();
        engine.set_field(&id, Field::Quantity, "5").unwrap();
        assert_eq!(engine.record(&id).unwrap().quantity, 5);
        assert!(engine.pending_since(&id).is_some());
        assert_eq!(engine.store().get(&id).unwrap().unwrap().quantity, 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(engine.store().get(&id).unwrap().unwrap().quantity, 5);
        // Confirmed only by the feed, which is not attached here.
        assert!(engine.pending_since(&id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_quantity_is_rejected_before_any_change() {
        let engine = engine().await;
        engine.ingest("3,A608A1,IGNITION COIL\n").await.unwrap();
        let id = by_code(&engine, "A608A1").id;

        let err = engine.set_field(&id, Field::Quantity, "plenty").unwrap_err();
        assert!(matches!(err, EngineError::InvalidValue { field: Field::Quantity, .. }));
        assert_eq!(engine.record(&id).unwrap().quantity, 3);
        assert!(engine.pending_since(&id).is_none());

        let missing = engine.set_field(&RecordId::from("nope"), Field::Code, "X");
        assert!(matches!(missing, Err(EngineError::RecordNotFound(_))));
    }

    #[test]
    fn edit_outside_runtime_is_refused_untouched() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let engine = runtime.block_on(async {
            let engine = engine().await;
            engine.ingest("3,A608A1,IGNITION COIL\n").await.unwrap();
            engine
        });
        let id = by_code(&engine, "A608A1").id;

        let err = engine.set_field(&id, Field::Quantity, "7").unwrap_err();
        assert!(matches!(err, EngineError::NoRuntime(_)));
        assert_eq!(engine.record(&id).unwrap().quantity, 3);
        assert!(engine.pending_since(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stepper_floors_at_zero() {
        let engine = engine().await;
        engine.ingest("1,90915-YZZE1,OIL FILTER TOYOTA\n").await.unwrap();
        let id = by_code(&engine, "90915-YZZE1").id;

        assert_eq!(engine.decrement(&id).await.unwrap(), 0);
        assert_eq!(engine.decrement(&id).await.unwrap(), 0);
        assert_eq!(engine.increment(&id).await.unwrap(), 1);
        assert_eq!(engine.store().get(&id).unwrap().unwrap().quantity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_label_reaches_store_catalog_before_record() {
        let engine = engine().await;
        engine.ingest("2,7PK1565,BELT BANDO\n").await.unwrap();
        let id = by_code(&engine, "7PK1565").id;

        engine.set_field(&id, Field::LocationPrimary, "Rack C").unwrap();
        assert!(engine.locations().contains(&"Rack C".to_string()));
        engine.flush().await.unwrap();

        let stored = engine.store().fetch_locations().await.unwrap();
        assert!(stored.contains(&"Rack C".to_string()));
        assert_eq!(engine.store().get(&id).unwrap().unwrap().location_primary, "Rack C");
    }

    #[tokio::test(start_paused = true)]
    async fn create_record_waits_for_store() {
        let engine = engine().await;
        let record = engine
            .create_record(RecordDraft {
                code: "NS40".into(),
                description: "BATTERY NS40 MF".into(),
                quantity: 3,
                category: "Battery".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(record.updated_at.is_some());
        assert_eq!(engine.record(&record.id), Some(record.clone()));
        assert!(engine.categories().contains(&"Battery".to_string()));

        let blank = engine
            .create_record(RecordDraft {
                code: "X".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(blank, Err(EngineError::InvalidValue { field: Field::Category, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn catalog_labels_are_validated_and_deduplicated() {
        let engine = engine().await;
        assert!(engine.add_category("Lubricants").await.unwrap());
        assert!(!engine.add_category("Lubricants").await.unwrap());
        assert!(engine.add_location("Shelf 4").await.unwrap());
        assert!(matches!(
            engine.add_location("  ").await,
            Err(EngineError::InvalidValue { .. })
        ));
        assert_eq!(engine.store().fetch_categories().await.unwrap(), vec!["Lubricants"]);
    }

    #[tokio::test(start_paused = true)]
    async fn category_stats_sorted_by_count() {
        let engine = engine().await;
        engine
            .ingest("1,A,WIPER BLADE 22\n2,B,BRAKE PAD F\n3,C,BRAKE SHOE R\n-1,D,WIPER BLADE 14\n5,E,BRAKE PUMP\n")
            .await
            .unwrap();
        let stats = engine.category_stats();
        assert_eq!(stats[0].name, "Brakes");
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[0].total_quantity, 10);
        assert_eq!(stats[1].name, "Wipers");
        assert_eq!(stats[1].total_quantity, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_changes_are_signalled() {
        let engine = engine().await;
        let mut changes = engine.changes();
        changes.borrow_and_update();
        engine.add_category("Belts").await.unwrap();
        assert!(changes.has_changed().unwrap());
    }
}

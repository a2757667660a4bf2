use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::Type;
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use partsync_core::{ChangeEvent, Hlc, HlcClock, InventoryRecord, RecordId};

use crate::error::StoreError;
use crate::feed::{ChangeFeed, DEFAULT_FEED_CAPACITY, FeedPublisher};
use crate::traits::RemoteStore;

pub const DEFAULT_ROW_CAP: usize = 1000;

const RECORD_COLUMNS: &str = "id, code, description, quantity, category, location_primary, location_secondary, updated_at";

const UPSERT_RECORD: &str = "INSERT INTO records (id, code, description, quantity, category, location_primary, location_secondary, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(id) DO UPDATE SET
        code = excluded.code,
        description = excluded.description,
        quantity = excluded.quantity,
        category = excluded.category,
        location_primary = excluded.location_primary,
        location_secondary = excluded.location_secondary,
        updated_at = excluded.updated_at";

const INSERT_RECORD: &str = "INSERT INTO records (id, code, description, quantity, category, location_primary, location_secondary, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

#[derive(Debug, Clone, Copy)]
enum LabelTable {
    Categories,
    Locations,
}

impl LabelTable {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Locations => "locations",
        }
    }
}

/// One row of the bulk-replace audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionAudit {
    pub digest: String,
    pub record_count: usize,
    pub replaced_at: Hlc,
}

struct Inner {
    conn: Connection,
    clock: HlcClock,
}

/// Authoritative store on a single rusqlite connection. Stamps every accepted write with
/// its own clock and broadcasts the resulting change event.
pub struct SqliteStore {
    inner: Mutex<Inner>,
    feed: FeedPublisher,
    row_cap: usize,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, row_cap: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, row_cap)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, DEFAULT_ROW_CAP)
    }

    fn from_connection(conn: Connection, row_cap: usize) -> Result<Self, StoreError> {
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                clock: HlcClock::new(),
            }),
            feed: FeedPublisher::new(DEFAULT_FEED_CAPACITY),
            row_cap: row_cap.max(1),
        })
    }

    pub fn with_row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = row_cap.max(1);
        self
    }

    /// Replace the broadcast channel. Existing subscriptions are closed.
    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed = FeedPublisher::new(capacity);
        self
    }

    pub fn publisher(&self) -> &FeedPublisher {
        &self.feed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_count(&self) -> Result<usize, StoreError> {
        let inner = self.lock();
        let n: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn get(&self, id: &RecordId) -> Result<Option<InventoryRecord>, StoreError> {
        let inner = self.lock();
        let mut stmt = inner
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id.as_str()], read_record)?;
        Ok(rows.next().transpose()?)
    }

    pub fn ingestion_log(&self) -> Result<Vec<IngestionAudit>, StoreError> {
        let inner = self.lock();
        let mut stmt = inner
            .conn
            .prepare("SELECT digest, record_count, replaced_at FROM ingestions ORDER BY seq")?;
        let audits = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(IngestionAudit {
                    digest: row.get(0)?,
                    record_count: count as usize,
                    replaced_at: read_hlc(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(audits)
    }

    fn page(&self, offset: usize, limit: usize) -> Result<Vec<InventoryRecord>, StoreError> {
        let limit = limit.min(self.row_cap);
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY seq LIMIT ?1 OFFSET ?2"
        ))?;
        let records = stmt
            .query_map(params![to_i64(limit), to_i64(offset)], read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn labels(&self, table: LabelTable) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let mut stmt = inner
            .conn
            .prepare(&format!("SELECT name FROM {} ORDER BY rowid", table.as_str()))?;
        let labels = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    fn add_label(&self, table: LabelTable, name: &str) -> Result<(), StoreError> {
        let inner = self.lock();
        let added = inner.conn.execute(
            &format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", table.as_str()),
            [name],
        )?;
        if added > 0 {
            debug!(table = table.as_str(), name, "catalog label added");
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, record), fields(id = %record.id))]
    fn write_record(&self, mut record: InventoryRecord) -> Result<InventoryRecord, StoreError> {
        let mut guard = self.lock();
        let Inner { conn, clock } = &mut *guard;
        let stamp = clock.tick()?;
        record.updated_at = Some(stamp);

        let tx = conn.transaction()?;
        let existed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1)",
            [record.id.as_str()],
            |row| row.get(0),
        )?;
        put_record(&tx, UPSERT_RECORD, &record, stamp)?;
        tx.commit()?;

        // Published under the lock so events leave in stamp order.
        let event = if existed {
            ChangeEvent::update(record.clone())
        } else {
            ChangeEvent::insert(record.clone())
        };
        self.feed.publish(&event);
        debug!(updated_at = %stamp, existed, "record accepted");
        Ok(record)
    }

    fn remove_record(&self, id: &RecordId) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let Inner { conn, .. } = &mut *guard;
        let tx = conn.transaction()?;
        let existing = {
            let mut stmt =
                tx.prepare(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"))?;
            let mut rows = stmt.query_map([id.as_str()], read_record)?;
            rows.next().transpose()?
        };
        let Some(existing) = existing else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        tx.execute("DELETE FROM records WHERE id = ?1", [id.as_str()])?;
        tx.commit()?;
        self.feed.publish(&ChangeEvent::delete(existing));
        debug!(%id, "record deleted");
        Ok(())
    }

    /// One transaction: labels, delete-all, inserts, audit row. Nothing is broadcast
    /// unless it commits.
    #[instrument(level = "debug", skip_all, fields(records = records.len(), digest = %digest))]
    fn replace(
        &self,
        records: Vec<InventoryRecord>,
        categories: &[String],
        locations: &[String],
        digest: &str,
    ) -> Result<usize, StoreError> {
        let mut guard = self.lock();
        let Inner { conn, clock } = &mut *guard;
        let tx = conn.transaction()?;

        for name in categories {
            tx.execute("INSERT OR IGNORE INTO categories (name) VALUES (?1)", [name])?;
        }
        for name in locations {
            tx.execute("INSERT OR IGNORE INTO locations (name) VALUES (?1)", [name])?;
        }

        let previous = {
            let mut stmt = tx.prepare(&format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY seq"))?;
            stmt.query_map([], read_record)?
                .collect::<Result<Vec<_>, _>>()?
        };
        tx.execute("DELETE FROM records", [])?;

        let mut accepted = Vec::with_capacity(records.len());
        for mut record in records {
            let stamp = clock.tick()?;
            record.updated_at = Some(stamp);
            put_record(&tx, INSERT_RECORD, &record, stamp)?;
            accepted.push(record);
        }

        let replaced_at = clock.tick()?;
        tx.execute(
            "INSERT INTO ingestions (digest, record_count, replaced_at) VALUES (?1, ?2, ?3)",
            params![digest, to_i64(accepted.len()), &replaced_at.to_bytes()[..]],
        )?;
        tx.commit()?;

        for record in previous {
            self.feed.publish(&ChangeEvent::delete(record));
        }
        for record in &accepted {
            self.feed.publish(&ChangeEvent::insert(record.clone()));
        }
        info!(written = accepted.len(), "bulk replace committed");
        Ok(accepted.len())
    }
}

fn put_record(
    conn: &Connection,
    sql: &str,
    record: &InventoryRecord,
    stamp: Hlc,
) -> Result<(), StoreError> {
    conn.prepare_cached(sql)?.execute(params![
        record.id.as_str(),
        record.code,
        record.description,
        record.quantity,
        record.category,
        record.location_primary,
        record.location_secondary,
        &stamp.to_bytes()[..],
    ])?;
    Ok(())
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn read_hlc(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Hlc> {
    let bytes: Vec<u8> = row.get(idx)?;
    Hlc::from_slice(&bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

fn read_record(row: &rusqlite::Row) -> rusqlite::Result<InventoryRecord> {
    let id: String = row.get(0)?;
    Ok(InventoryRecord {
        id: RecordId::from_string(id),
        code: row.get(1)?,
        description: row.get(2)?,
        quantity: row.get(3)?,
        category: row.get(4)?,
        location_primary: row.get(5)?,
        location_secondary: row.get(6)?,
        updated_at: Some(read_hlc(row, 7)?),
    })
}

impl RemoteStore for SqliteStore {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryRecord>, StoreError> {
        self.page(offset, limit)
    }

    async fn fetch_categories(&self) -> Result<Vec<String>, StoreError> {
        self.labels(LabelTable::Categories)
    }

    async fn fetch_locations(&self) -> Result<Vec<String>, StoreError> {
        self.labels(LabelTable::Locations)
    }

    fn row_cap(&self) -> usize {
        self.row_cap
    }

    async fn upsert(&self, record: InventoryRecord) -> Result<InventoryRecord, StoreError> {
        self.write_record(record)
    }

    async fn upsert_category(&self, name: String) -> Result<(), StoreError> {
        self.add_label(LabelTable::Categories, &name)
    }

    async fn upsert_location(&self, name: String) -> Result<(), StoreError> {
        self.add_label(LabelTable::Locations, &name)
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.remove_record(&id)
    }

    async fn replace_all(
        &self,
        records: Vec<InventoryRecord>,
        categories: Vec<String>,
        locations: Vec<String>,
        digest: String,
    ) -> Result<usize, StoreError> {
        self.replace(records, &categories, &locations, &digest)
    }

    fn subscribe(&self) -> ChangeFeed {
        self.feed.subscribe()
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("row_cap", &self.row_cap)
            .field("subscribers", &self.feed.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use partsync_core::{ChangeKind, RecordDraft};

    use super::*;

    fn draft(code: &str, quantity: i64) -> InventoryRecord {
        RecordDraft {
            code: code.into(),
            description: format!("PART {code}"),
            quantity,
            category: "Brakes".into(),
            ..Default::default()
        }
        .into_record(RecordId::from(code))
    }

    #[tokio::test]
    async fn upsert_stamps_and_announces() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut feed = store.subscribe();

        let first = store.upsert(draft("GDB7707", 6)).await.unwrap();
        let mut edited = first.clone();
        edited.quantity = 5;
        let second = store.upsert(edited).await.unwrap();

        assert!(second.updated_at > first.updated_at);
        let insert = feed.recv().await.unwrap();
        assert_eq!(insert.kind, ChangeKind::Insert);
        assert_eq!(insert.record.updated_at, first.updated_at);
        let update = feed.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.record.quantity, 5);
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(store.get(&RecordId::from("GDB7707")).unwrap(), Some(second));
    }

    #[tokio::test]
    async fn pages_are_capped_and_fetch_all_pages_through() {
        let store = SqliteStore::open_in_memory().unwrap().with_row_cap(10);
        for i in 0..25 {
            store.upsert(draft(&format!("P{i:02}"), i)).await.unwrap();
        }
        assert_eq!(store.fetch_page(0, 100).await.unwrap().len(), 10);
        assert_eq!(store.fetch_page(20, 10).await.unwrap().len(), 5);

        let snapshot = store.fetch_all(1000).await.unwrap();
        let codes: Vec<String> = snapshot.records.iter().map(|r| r.code.clone()).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("P{i:02}")).collect();
        assert_eq!(codes, expected);
    }

    #[tokio::test]
    async fn fetch_all_on_exact_multiple_terminates() {
        let store = SqliteStore::open_in_memory().unwrap().with_row_cap(5);
        for i in 0..10 {
            store.upsert(draft(&format!("P{i}"), 1)).await.unwrap();
        }
        assert_eq!(store.fetch_all(1000).await.unwrap().records.len(), 10);
    }

    #[tokio::test]
    async fn catalogs_keep_first_seen_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for name in ["Brakes", "Belts", "Brakes", "Wipers"] {
            store.upsert_category(name.into()).await.unwrap();
        }
        store.upsert_location("Rack A".into()).await.unwrap();
        assert_eq!(
            store.fetch_categories().await.unwrap(),
            vec!["Brakes", "Belts", "Wipers"]
        );
        assert_eq!(store.fetch_locations().await.unwrap(), vec!["Rack A"]);
    }

    #[tokio::test]
    async fn replace_all_swaps_contents_and_audits() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(draft("OLD1", 1)).await.unwrap();
        let mut feed = store.subscribe();

        let written = store
            .replace_all(
                vec![draft("NEW1", 2), draft("NEW2", 3)],
                vec!["Brakes".into()],
                vec!["Rack A".into()],
                "abc123".into(),
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let snapshot = store.fetch_all(100).await.unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert!(snapshot.records.iter().all(|r| r.updated_at.is_some()));
        assert_eq!(snapshot.categories, vec!["Brakes"]);
        assert_eq!(snapshot.locations, vec!["Rack A"]);

        let kinds = [
            feed.recv().await.unwrap().kind,
            feed.recv().await.unwrap().kind,
            feed.recv().await.unwrap().kind,
        ];
        assert_eq!(kinds, [ChangeKind::Delete, ChangeKind::Insert, ChangeKind::Insert]);

        let log = store.ingestion_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].digest, "abc123");
        assert_eq!(log[0].record_count, 2);
    }

    #[tokio::test]
    async fn failed_replace_leaves_store_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(draft("OLD1", 1)).await.unwrap();
        let mut feed = store.subscribe();

        // Duplicate ids violate the unique constraint halfway through.
        let result = store
            .replace_all(
                vec![draft("DUP", 1), draft("DUP", 2)],
                vec!["Never".into()],
                vec![],
                "x".into(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));

        let snapshot = store.fetch_all(100).await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].code, "OLD1");
        assert!(snapshot.categories.is_empty());
        assert!(store.ingestion_log().unwrap().is_empty());

        store.upsert(draft("AFTER", 1)).await.unwrap();
        assert_eq!(feed.recv().await.unwrap().record.code, "AFTER");
    }

    #[tokio::test]
    async fn delete_announces_and_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(draft("A", 1)).await.unwrap();
        let mut feed = store.subscribe();

        store.delete(RecordId::from("A")).await.unwrap();
        let event = feed.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.record.code, "A");
        assert!(matches!(
            store.delete(RecordId::from("A")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.db");
        {
            let store = SqliteStore::open(&path, DEFAULT_ROW_CAP).unwrap();
            store.upsert(draft("KEEP", 4)).await.unwrap();
            store.upsert_category("Brakes".into()).await.unwrap();
        }
        let store = SqliteStore::open(&path, DEFAULT_ROW_CAP).unwrap();
        let snapshot = store.fetch_all(100).await.unwrap();
        assert_eq!(snapshot.records[0].code, "KEEP");
        assert_eq!(snapshot.records[0].quantity, 4);
        assert_eq!(snapshot.categories, vec!["Brakes"]);
    }
}

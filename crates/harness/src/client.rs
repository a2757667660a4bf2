use std::sync::Arc;
use std::time::Duration;

use partsync_core::{InventoryRecord, RecordId};
use partsync_engine::{Engine, EngineConfig, EngineError, FeedHandle};
use partsync_storage::SqliteStore;

use crate::FlakyStore;

/// One client: an engine over a [`FlakyStore`] in front of a shared store, with its feed
/// attached.
pub struct TestClient {
    pub engine: Engine<FlakyStore<SqliteStore>>,
    pub store: Arc<FlakyStore<SqliteStore>>,
    feed: FeedHandle,
}

impl TestClient {
    pub async fn connect(store: Arc<SqliteStore>, config: EngineConfig) -> Result<Self, EngineError> {
        let store = Arc::new(FlakyStore::new(store));
        let engine = Engine::new(Arc::clone(&store), config);
        engine.load().await?;
        let feed = engine.attach_feed();
        Ok(Self { engine, store, feed })
    }

    /// A client with a private in-memory store.
    pub async fn standalone() -> Result<Self, EngineError> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        Self::connect(store, EngineConfig::default()).await
    }

    /// Connect, then ingest `raw`.
    pub async fn with_feed(raw: &str) -> Result<Self, EngineError> {
        let client = Self::standalone().await?;
        client.engine.ingest(raw).await?;
        Ok(client)
    }

    pub fn feed_running(&self) -> bool {
        self.feed.is_running()
    }

    /// First cached record with `code`.
    pub fn by_code(&self, code: &str) -> Option<InventoryRecord> {
        self.engine
            .visible_records(|r| r.code == code)
            .into_iter()
            .next()
    }

    pub fn id_of(&self, code: &str) -> Option<RecordId> {
        self.by_code(code).map(|r| r.id)
    }

    /// Let spawned tasks (feed pump, in-flight writes) run without advancing past any
    /// debounce window.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

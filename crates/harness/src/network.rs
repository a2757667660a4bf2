use std::sync::Arc;

use partsync_engine::{EngineConfig, EngineError};
use partsync_storage::SqliteStore;

use crate::TestClient;

/// Clients sharing one authoritative store.
pub struct TestNetwork {
    store: Arc<SqliteStore>,
    clients: Vec<TestClient>,
}

impl TestNetwork {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self::with_store(SqliteStore::open_in_memory()?))
    }

    pub fn with_store(store: SqliteStore) -> Self {
        Self {
            store: Arc::new(store),
            clients: Vec::new(),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub async fn add_client(&mut self) -> Result<usize, EngineError> {
        let client = TestClient::connect(Arc::clone(&self.store), EngineConfig::default()).await?;
        let index = self.clients.len();
        self.clients.push(client);
        Ok(index)
    }

    pub fn client(&self, index: usize) -> &TestClient {
        &self.clients[index]
    }
}

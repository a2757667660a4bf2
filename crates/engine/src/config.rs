use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use partsync_core::Classifier;
use partsync_core::classify::Rule;
use partsync_core::ingest::{DEFAULT_HEADER_SCAN_LINES, IngestOptions};
use partsync_storage::SqliteStore;
use partsync_storage::sqlite::DEFAULT_ROW_CAP;

use crate::error::EngineError;

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Engine settings, read from TOML. Every key is optional.
///
/// ```toml
/// [engine]
/// debounce_ms = 300
/// page_size = 1000
///
/// [ingest]
/// header_scan_lines = 10
///
/// [store]
/// path = "parts.db"
/// row_cap = 1000
///
/// [[classifier.rules]]
/// category = "Lubricants"
/// keywords = ["LIQUI MOLY"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub ingest: IngestSection,
    pub store: StoreSection,
    pub classifier: ClassifierSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub debounce_ms: u64,
    pub page_size: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub header_scan_lines: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            header_scan_lines: DEFAULT_HEADER_SCAN_LINES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// In-memory when absent.
    pub path: Option<PathBuf>,
    pub row_cap: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            row_cap: DEFAULT_ROW_CAP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    /// Evaluated before the built-in table.
    pub rules: Vec<Rule>,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(EngineError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.engine.debounce_ms)
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            header_scan_lines: self.ingest.header_scan_lines,
            classifier: Classifier::with_extra_rules(self.classifier.rules.clone()),
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore, EngineError> {
        let store = match &self.store.path {
            Some(path) => SqliteStore::open(path, self.store.row_cap)?,
            None => SqliteStore::open_in_memory()?.with_row_cap(self.store.row_cap),
        };
        Ok(store)
    }
}

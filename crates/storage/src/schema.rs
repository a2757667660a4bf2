use rusqlite::Connection;

use crate::error::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// `seq` fixes insertion order so paging with LIMIT/OFFSET is stable across calls.
// Catalog tables are ordered by their implicit rowid.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    code TEXT NOT NULL,
    description TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    category TEXT NOT NULL,
    location_primary TEXT NOT NULL,
    location_secondary TEXT NOT NULL,
    updated_at BLOB NOT NULL CHECK (length(updated_at) = 12)
);

CREATE TABLE IF NOT EXISTS categories (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS locations (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS ingestions (
    seq INTEGER PRIMARY KEY,
    digest TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    replaced_at BLOB NOT NULL CHECK (length(replaced_at) = 12)
);
";

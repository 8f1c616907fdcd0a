//! SQLite-backed key-value store for topology records
//!
//! Records are JSON documents addressed by composite keys (see [`crate::keys`]).
//! Every single-key operation runs under one connection lock, which gives
//! per-key atomicity. There are no multi-key transactions; callers that need
//! read-modify-write on one key use [`Database::kv_compare_and_swap`].

use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Key-value store
    // ========================================================================

    /// Set a key-value pair, bumping its version
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO kv_store (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = kv_store.version + 1,
                updated_at = excluded.updated_at",
            params![key, value, now],
        )?;

        Ok(())
    }

    /// Insert a key only if it is absent. Returns false if the key exists.
    pub fn kv_insert(&self, key: &str, value: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let changed = conn.execute(
            "INSERT OR IGNORE INTO kv_store (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)",
            params![key, value, now],
        )?;

        Ok(changed == 1)
    }

    /// Get a value by key
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.kv_get_versioned(key)?.map(|(value, _)| value))
    }

    /// Get a value and its version by key
    pub fn kv_get_versioned(&self, key: &str) -> Result<Option<(String, u64)>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT value, version FROM kv_store WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(value, version)| (value, version as u64)))
    }

    /// Replace a value only if its stored version still matches.
    ///
    /// `expected_version = None` means the key must not exist yet. Returns
    /// false when another writer got there first.
    pub fn kv_compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let changed = match expected_version {
            None => conn.execute(
                "INSERT OR IGNORE INTO kv_store (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)",
                params![key, value, now],
            )?,
            Some(version) => conn.execute(
                "UPDATE kv_store SET value = ?1, version = version + 1, updated_at = ?2
                 WHERE key = ?3 AND version = ?4",
                params![value, now, key, version as i64],
            )?,
        };

        Ok(changed == 1)
    }

    /// Delete a key. Returns true if something was removed.
    pub fn kv_delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    /// All entries whose key starts with `prefix`, ordered by key
    pub fn kv_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv_store
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;

        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ========================================================================
    // JSON helpers
    // ========================================================================

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv_get(key)? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv_set(key, &serde_json::to_string(value)?)
    }

    pub fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.kv_scan_prefix(prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_str(&value).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        value: String,
    }

    #[test]
    fn test_kv_crud() {
        let db = Database::open_memory().unwrap();

        db.kv_set("a/1", "one").unwrap();
        assert_eq!(db.kv_get("a/1").unwrap().as_deref(), Some("one"));

        db.kv_set("a/1", "uno").unwrap();
        let (value, version) = db.kv_get_versioned("a/1").unwrap().unwrap();
        assert_eq!(value, "uno");
        assert_eq!(version, 2);

        assert!(db.kv_delete("a/1").unwrap());
        assert!(!db.kv_delete("a/1").unwrap());
        assert!(db.kv_get("a/1").unwrap().is_none());
    }

    #[test]
    fn test_kv_insert_refuses_existing_key() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_insert("k", "first").unwrap());
        assert!(!db.kv_insert("k", "second").unwrap());
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_compare_and_swap() {
        let db = Database::open_memory().unwrap();

        assert!(db.kv_compare_and_swap("k", None, "v1").unwrap());
        assert!(!db.kv_compare_and_swap("k", None, "again").unwrap());

        assert!(db.kv_compare_and_swap("k", Some(1), "v2").unwrap());
        // Stale version loses
        assert!(!db.kv_compare_and_swap("k", Some(1), "v3").unwrap());

        let (value, version) = db.kv_get_versioned("k").unwrap().unwrap();
        assert_eq!(value, "v2");
        assert_eq!(version, 2);
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let db = Database::open_memory().unwrap();
        db.kv_set("extclient/net1/b", "b").unwrap();
        db.kv_set("extclient/net1/a", "a").unwrap();
        db.kv_set("extclient/net10/c", "c").unwrap();
        db.kv_set("node/x", "x").unwrap();

        let keys: Vec<String> = db
            .kv_scan_prefix("extclient/net1/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["extclient/net1/a", "extclient/net1/b"]);
    }

    #[test]
    fn test_json_helpers() {
        let db = Database::open_memory().unwrap();
        let record = Record { value: "test".to_string() };
        db.put_json("r/1", &record).unwrap();

        let fetched: Record = db.get_json("r/1").unwrap().unwrap();
        assert_eq!(fetched, record);

        let all: Vec<Record> = db.scan_json("r/").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("topology.db");
        {
            let db = Database::open(&path).unwrap();
            db.kv_set("k", "v").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));
    }
}

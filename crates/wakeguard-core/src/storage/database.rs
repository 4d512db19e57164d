//! SQLite-backed key-value store.
//!
//! Every record the engine keeps (alarm definitions, trigger registrations,
//! ringing sessions, consequence queue snapshots) lives in one `kv` table.
//! Single-statement writes are atomic under SQLite's journal, which gives
//! the all-or-nothing durability the engine relies on.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::{data_dir, KvStore};
use crate::error::PersistenceError;

/// SQLite database holding the engine's durable state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/wakeguard.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, PersistenceError> {
        let dir = data_dir().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::open_at(&dir.join("wakeguard.db"))
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|e| PersistenceError::OpenFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        // WAL keeps readers consistent if the process dies mid-write.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Backend("connection mutex poisoned".into()))
    }
}

impl KvStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PersistenceError::Read {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at)
             VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![key, value],
        )
        .map_err(|e| PersistenceError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| PersistenceError::Write {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, PersistenceError> {
        let conn = self.lock()?;
        // substr comparison avoids LIKE wildcards inside alarm ids.
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert!(db.get("test").unwrap().is_none());
        db.put("test", "hello").unwrap();
        assert_eq!(db.get("test").unwrap().as_deref(), Some("hello"));
        db.put("test", "again").unwrap();
        assert_eq!(db.get("test").unwrap().as_deref(), Some("again"));
        db.delete("test").unwrap();
        assert!(db.get("test").unwrap().is_none());
        db.delete("test").unwrap();
    }

    #[test]
    fn scan_prefix_is_literal() {
        let db = Database::open_memory().unwrap();
        db.put("session:a", "1").unwrap();
        db.put("session:b", "2").unwrap();
        db.put("session_x", "3").unwrap();
        db.put("queue:a", "4").unwrap();
        let rows = db.scan_prefix("session:").unwrap();
        assert_eq!(
            rows,
            vec![
                ("session:a".to_string(), "1".to_string()),
                ("session:b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wakeguard.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.put("alarm:1", "{}").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get("alarm:1").unwrap().as_deref(), Some("{}"));
    }
}

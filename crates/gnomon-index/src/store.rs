use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable index state. A single-row table carries the last fully indexed
/// height; discovered contracts are keyed by SCID.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("gnomon.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS index_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                last_height INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS contracts (
                scid TEXT PRIMARY KEY,
                height INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Last fully indexed height, or 0 when nothing has been indexed yet.
    pub fn last_indexed_height(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let height: Option<i64> = conn
            .query_row(
                "SELECT last_height FROM index_state WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height.unwrap_or(0))
    }

    pub fn set_last_indexed_height(&self, height: i64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO index_state (id, last_height) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET last_height = excluded.last_height",
            params![height],
        )?;
        Ok(())
    }

    pub fn record_contract(&self, scid: &str, height: i64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO contracts (scid, height) VALUES (?1, ?2)",
            params![scid, height],
        )?;
        Ok(())
    }

    pub fn contracts(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT scid FROM contracts ORDER BY height")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut scids = Vec::new();
        for row in rows {
            scids.push(row?);
        }
        Ok(scids)
    }
}

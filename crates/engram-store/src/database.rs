//! The shared database handle.
//!
//! `Database::open` runs every pending migration before any store is handed
//! out, so a process never operates on a schema at an unknown version. A
//! migration failure means no stores.

use engram_types::error::{EngramError, EngramResult};
use engram_types::time::TimeSource;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::correlations::CorrelationStore;
use crate::nodes::GraphNodeStore;
use crate::schema::{run_migrations, MIGRATIONS};

/// Handle to the single embedded schema file shared by all stores.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    time: Arc<dyn TimeSource>,
}

impl Database {
    /// Open (creating if needed) the database file and bring its schema up
    /// to date.
    pub fn open(path: &Path, time: Arc<dyn TimeSource>) -> EngramResult<Self> {
        let conn = Connection::open(path).map_err(|e| EngramError::Storage(e.to_string()))?;
        Self::init(conn, time)
    }

    /// An in-memory database, fully migrated. Used by tests.
    pub fn open_in_memory(time: Arc<dyn TimeSource>) -> EngramResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EngramError::Storage(e.to_string()))?;
        Self::init(conn, time)
    }

    fn init(mut conn: Connection, time: Arc<dyn TimeSource>) -> EngramResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        run_migrations(&mut conn, time.as_ref(), MIGRATIONS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            time,
        })
    }

    /// The correlation store over this database.
    pub fn correlations(&self) -> CorrelationStore {
        CorrelationStore::new(self.conn.clone(), self.time.clone())
    }

    /// The graph node store over this database.
    pub fn nodes(&self) -> GraphNodeStore {
        GraphNodeStore::new(self.conn.clone(), self.time.clone())
    }

    /// The raw connection handle, for sibling stores sharing this schema
    /// file (the secrets store lives in another crate).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// The time source all stores stamp rows with.
    pub fn time(&self) -> Arc<dyn TimeSource> {
        self.time.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::applied_migrations;
    use engram_types::time::SystemClock;

    #[test]
    fn test_open_runs_migrations_before_stores() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("engram.db"), Arc::new(SystemClock)).unwrap();
        let conn = db.connection();
        let applied = applied_migrations(&conn.lock().unwrap()).unwrap();
        assert_eq!(applied.len(), MIGRATIONS.len());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.db");
        Database::open(&path, Arc::new(SystemClock)).unwrap();
        Database::open(&path, Arc::new(SystemClock)).unwrap();
    }
}

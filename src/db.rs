// src/db.rs
// The engine's own SQLite state database (settings overrides, issued-ID ledger).
use crate::error::{ResetError, Result};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub const STATE_DB_FILE: &str = "state.db";

#[derive(Clone)]
pub struct StateDb {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb").field("path", &self.path).finish()
    }
}

impl StateDb {
    /// Opens (creating if needed) `state.db` inside `state_dir` and ensures the schema.
    pub fn open(state_dir: &Path) -> Result<StateDb> {
        if !state_dir.exists() {
            fs::create_dir_all(state_dir).map_err(|e| ResetError::io(state_dir, e))?;
        }
        let path = state_dir.join(STATE_DB_FILE);
        debug!("State database: {}", path.display());
        let conn = Connection::open(&path)?;
        init_db_tables(&conn)?;
        Ok(StateDb {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locks the connection. A poisoned lock still hands out the connection;
    /// SQLite keeps its own consistency.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Creates the necessary tables if they don't exist
fn init_db_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS issued_ids (
            fingerprint TEXT PRIMARY KEY NOT NULL,
            path TEXT NOT NULL,
            field TEXT NOT NULL,
            issued_at TEXT NOT NULL
        );
        "#,
    )?;
    debug!("State database tables initialized.");
    Ok(())
}

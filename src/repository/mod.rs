//! Persistence: the resume state file and the SQLite catalog.

mod catalog;
mod state_store;

pub use catalog::{CatalogRepository, CatalogSink, RepositoryError, StoredReference};
pub use state_store::{StateError, StateStore};

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

/// Open a SQLite connection with the settings every repository expects.
pub fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

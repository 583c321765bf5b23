//! SQLite persistence for experiments, segmentations and simulation runs.
//!
//! The engine modules never touch the database; this module reads and writes
//! the plain records they consume and produce. Every multi-row write runs in
//! one transaction.

pub mod migrate;
mod records;

pub use records::{ExperimentRecord, StrategyRecord};

use crate::error::{EvalError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tokio::task;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA busy_timeout = 5000;";

/// Handle on the evaluation database
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open the database at `db_path`, creating it and applying pending
    /// migrations if needed
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let store = Self {
            path: db_path.as_ref().to_path_buf(),
        };
        store.with_connection(migrate::run_migrations).await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_connection(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            EvalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Database task failed: {}", e),
            ))
        })?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(PRAGMAS)?;
    Ok(conn)
}

//! SQLite storage bootstrap, schema migrations and savepoint scoping.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing the document store.
//! - Apply schema migrations in deterministic order.
//! - Provide nested-safe savepoint scoping for multi-statement writes.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write documents before migrations succeed.
//! - A savepoint opened by [`with_savepoint`] is always released or rolled back.

use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_from_config, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Runs `work` inside a named SQLite savepoint.
///
/// Savepoints nest, so this is usable both on a bare connection (where it
/// behaves like a transaction) and inside an outer transaction or savepoint.
///
/// # Contract
/// - `Ok` releases the savepoint; its writes become part of the enclosing
///   scope (or commit, when there is none).
/// - `Err` rolls back every write made since the savepoint and returns the
///   original error. A failing rollback is logged, never masks `work`'s error.
pub fn with_savepoint<T, E, F>(conn: &Connection, name: &'static str, work: F) -> Result<T, E>
where
    E: From<rusqlite::Error>,
    F: FnOnce() -> Result<T, E>,
{
    conn.execute_batch(&format!("SAVEPOINT \"{name}\";"))?;

    match work() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT \"{name}\";"))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT \"{name}\"; RELEASE SAVEPOINT \"{name}\";"
            )) {
                warn!(
                    "event=savepoint_rollback module=db status=error savepoint={} error={}",
                    name, rollback_err
                );
            }
            Err(err)
        }
    }
}

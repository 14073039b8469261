//! JSON document store over the shared `documents` table.
//!
//! # Responsibility
//! - Give each entity type a collection handle with `find`, `insert_one`,
//!   `insert_many`, `replace_one`, `update_many` and `create_index`.
//! - Translate SQLite unique-constraint failures into [`StoreError::DuplicateKey`].
//!
//! # Invariants
//! - Every statement is scoped to exactly one collection.
//! - The `id` column always equals `$.id` of the stored body.
//! - Results come back in insertion order.
//!
//! The store knows nothing about soft deletion; that policy lives in
//! `repo::active_repo`.

mod collection;
pub mod filter;

pub use collection::Collection;
pub use filter::{validate_name, Filter, IndexSpec, Update, ID_FIELD};

use crate::db::DbError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// A unique index (identity or partial) rejected the write.
    DuplicateKey { collection: &'static str },
    /// Collection, field or index name failed validation.
    InvalidName(String),
    InvalidDocument(String),
    Serde(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateKey { collection } => {
                write!(f, "duplicate key rejected in collection `{collection}`")
            }
            Self::InvalidName(name) => write!(f, "invalid store name `{name}`"),
            Self::InvalidDocument(message) => write!(f, "invalid document: {message}"),
            Self::Serde(err) => write!(f, "document encoding failed: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::DuplicateKey { .. } | Self::InvalidName(_) | Self::InvalidDocument(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Entry point handing out collection handles over one connection.
#[derive(Clone, Copy)]
pub struct DocumentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> DocumentStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Returns a handle for `name`, validating it first.
    pub fn collection(&self, name: &'static str) -> StoreResult<Collection<'conn>> {
        validate_name(name)?;
        Ok(Collection::new(self.conn, name))
    }
}

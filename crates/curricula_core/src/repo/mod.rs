//! Repository layer: soft-delete enforcement and relation persistence.
//!
//! # Responsibility
//! - Own the "not deleted" read invariant for every entity type.
//! - Persist relation rows and their cascade/batch mutations.
//! - Hand out repository instances through a unit of work.
//!
//! # Invariants
//! - No read path returns a row whose `deleted` flag is set.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`,
//!   `InvalidArgument`) in addition to store transport errors.

pub mod active_repo;
pub mod relation_repo;
pub mod unit_of_work;

use crate::db::DbError;
use crate::model::meta::{EntityId, InvalidEntityId};
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Coarse error category exposed to callers above the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Unexpected,
}

#[derive(Debug)]
pub enum RepoError {
    /// Row is absent or already soft-deleted.
    NotFound {
        collection: &'static str,
        id: EntityId,
    },
    /// An active row with the same identity or endpoint pair already exists.
    Conflict {
        collection: &'static str,
        detail: String,
    },
    InvalidArgument(String),
    Store(StoreError),
    /// Persisted document cannot be converted to a valid entity.
    InvalidData(String),
}

impl RepoError {
    pub fn not_found(collection: &'static str, id: EntityId) -> Self {
        Self::NotFound { collection, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Store(_) | Self::InvalidData(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { collection, id } => write!(f, "{collection} row not found: {id}"),
            Self::Conflict { collection, detail } => write!(f, "{collection} conflict: {detail}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::NotFound { .. }
            | Self::Conflict { .. }
            | Self::InvalidArgument(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateKey { collection } => Self::Conflict {
                collection,
                detail: "an active row with the same key already exists".to_string(),
            },
            other => Self::Store(other),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Store(StoreError::Db(value))
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

impl From<InvalidEntityId> for RepoError {
    fn from(value: InvalidEntityId) -> Self {
        Self::InvalidArgument(value.to_string())
    }
}


//! Base entity shape and the capability traits repositories are generic over.
//!
//! # Responsibility
//! - Define the identity/timestamp/soft-delete block shared by every document.
//! - Define [`Document`] and [`Relation`], the only contracts repositories need.
//!
//! # Invariants
//! - `RowState` is the source of truth for tombstone state; it serializes as
//!   the boolean `deleted` field the store filters on.
//! - A nil [`EntityId`] means "not assigned yet"; stored documents never carry one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// JSON field carrying the soft-delete flag.
pub const DELETED_FIELD: &str = "deleted";
/// JSON field carrying the last-mutation timestamp.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Stable identifier of any stored entity or relation row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a caller-supplied identifier. Surrounding whitespace is rejected.
    pub fn parse(raw: &str) -> Result<Self, InvalidEntityId> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| InvalidEntityId(raw.to_string()))
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<EntityId> for serde_json::Value {
    fn from(value: EntityId) -> Self {
        serde_json::Value::String(value.to_string())
    }
}

/// Raised when an identifier string is not a well-formed UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntityId(pub String);

impl Display for InvalidEntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed entity id `{}`", self.0)
    }
}

impl Error for InvalidEntityId {}

/// Visibility of a stored row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum RowState {
    #[default]
    Active,
    Deleted,
}

impl From<bool> for RowState {
    fn from(deleted: bool) -> Self {
        if deleted {
            Self::Deleted
        } else {
            Self::Active
        }
    }
}

impl From<RowState> for bool {
    fn from(state: RowState) -> Self {
        state == RowState::Deleted
    }
}

/// Identity, timestamps and tombstone flag flattened into every document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    /// Epoch ms, set once at insert.
    pub inserted_at: i64,
    /// Epoch ms, refreshed by every mutation.
    pub updated_at: i64,
    pub deleted: RowState,
}

impl EntityMeta {
    /// Meta for a caller-chosen id; timestamps are stamped on insert.
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted == RowState::Active
    }
}

/// Capability contract for anything the generic repository can persist.
///
/// Implementors expose their [`EntityMeta`]; the accessors below are derived
/// from it so no repository code touches concrete entity fields.
pub trait Document: Serialize + DeserializeOwned + Clone {
    /// Store collection holding this entity type.
    const COLLECTION: &'static str;

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn set_id(&mut self, id: EntityId) {
        self.meta_mut().id = id;
    }

    /// Returns `(inserted_at, updated_at)`.
    fn timestamps(&self) -> (i64, i64) {
        let meta = self.meta();
        (meta.inserted_at, meta.updated_at)
    }

    fn set_timestamps(&mut self, inserted_at: i64, updated_at: i64) {
        let meta = self.meta_mut();
        meta.inserted_at = inserted_at;
        meta.updated_at = updated_at;
    }

    fn is_deleted(&self) -> bool {
        !self.meta().is_active()
    }

    fn set_state(&mut self, state: RowState) {
        self.meta_mut().deleted = state;
    }
}

/// Which endpoint of a relation is held fixed by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// One `(left, right)` endpoint pair of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingPair {
    pub left: EntityId,
    pub right: EntityId,
}

impl MappingPair {
    pub fn new(left: EntityId, right: EntityId) -> Self {
        Self { left, right }
    }

    pub fn on(&self, side: Side) -> EntityId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

impl Display for MappingPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.left, self.right)
    }
}

/// A two-sided association row linking `Left` and `Right` entities.
pub trait Relation: Document {
    type Left: Document;
    type Right: Document;

    /// JSON field holding the left endpoint id.
    const LEFT_FIELD: &'static str;
    /// JSON field holding the right endpoint id.
    const RIGHT_FIELD: &'static str;

    /// Builds an unsaved row for the given endpoints.
    fn link(left: EntityId, right: EntityId) -> Self;

    fn left_id(&self) -> EntityId;
    fn right_id(&self) -> EntityId;
    fn set_left_id(&mut self, id: EntityId);
    fn set_right_id(&mut self, id: EntityId);

    fn pair(&self) -> MappingPair {
        MappingPair::new(self.left_id(), self.right_id())
    }

    fn field(side: Side) -> &'static str {
        match side {
            Side::Left => Self::LEFT_FIELD,
            Side::Right => Self::RIGHT_FIELD,
        }
    }

    fn id_on(&self, side: Side) -> EntityId {
        self.pair().on(side)
    }

    /// Builds an unsaved row with `fixed` on `side` and `other` opposite it.
    fn link_on(side: Side, fixed: EntityId, other: EntityId) -> Self {
        match side {
            Side::Left => Self::link(fixed, other),
            Side::Right => Self::link(other, fixed),
        }
    }

    /// Collection of the entity type on `side`.
    fn endpoint_collection(side: Side) -> &'static str {
        match side {
            Side::Left => <Self::Left as Document>::COLLECTION,
            Side::Right => <Self::Right as Document>::COLLECTION,
        }
    }
}

/// Wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Implements [`Document`] for a struct with a `meta: EntityMeta` field.
#[macro_export]
macro_rules! impl_document {
    ($ty:ty, $collection:literal) => {
        impl $crate::model::meta::Document for $ty {
            const COLLECTION: &'static str = $collection;

            fn meta(&self) -> &$crate::model::meta::EntityMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::model::meta::EntityMeta {
                &mut self.meta
            }
        }
    };
}

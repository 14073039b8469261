//! Generic soft-delete aware repository.
//!
//! # Responsibility
//! - Provide CRUD for any [`Document`] type without per-entity code.
//! - Stamp ids and timestamps on write.
//!
//! # Invariants
//! - Every read and every mutation is scoped to active rows; the
//!   `deleted = false` condition is injected here and nowhere else.
//! - Deletion is a tombstone (`deleted = true`), never a physical removal.
//! - Deleting or replacing a missing/deleted row is `NotFound`, not a no-op.

use crate::config::DEFAULT_LOOKUP_CHUNK_SIZE;
use crate::model::meta::{
    now_epoch_ms, Document, EntityId, EntityMeta, RowState, DELETED_FIELD, UPDATED_AT_FIELD,
};
use crate::repo::{RepoError, RepoResult};
use crate::store::{Collection, DocumentStore, Filter, IndexSpec, Update, ID_FIELD};
use log::debug;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;

/// CRUD wrapper enforcing the active-row invariant for entity type `E`.
pub struct ActiveRepository<'conn, E: Document> {
    collection: Collection<'conn>,
    lookup_chunk_size: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<'conn, E: Document> ActiveRepository<'conn, E> {
    pub fn new(conn: &'conn Connection) -> RepoResult<Self> {
        let collection = DocumentStore::new(conn).collection(E::COLLECTION)?;
        Ok(Self {
            collection,
            lookup_chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
            _entity: PhantomData,
        })
    }

    /// Overrides how many ids one existence lookup may carry.
    pub fn with_lookup_chunk_size(mut self, chunk_size: usize) -> Self {
        self.lookup_chunk_size = chunk_size.max(1);
        self
    }

    pub fn collection_name(&self) -> &'static str {
        E::COLLECTION
    }

    /// Loads one active row by typed id.
    pub fn get(&self, id: EntityId) -> RepoResult<E> {
        self.find_one(Filter::by_id(id))?
            .ok_or_else(|| RepoError::not_found(E::COLLECTION, id))
    }

    /// Loads one active row by caller-supplied id text.
    ///
    /// Malformed ids fail with `InvalidArgument` before any store access.
    pub fn get_by_id(&self, raw_id: &str) -> RepoResult<E> {
        let id = EntityId::parse(raw_id)?;
        self.get(id)
    }

    pub fn find_one(&self, filter: Filter) -> RepoResult<Option<E>> {
        self.collection
            .find_one(&active(filter))?
            .map(decode_active::<E>)
            .transpose()
    }

    pub fn filter_by(&self, filter: Filter) -> RepoResult<Vec<E>> {
        self.collection
            .find(&active(filter))?
            .into_iter()
            .map(decode_active::<E>)
            .collect()
    }

    /// Active rows whose `field` holds any of `ids`, chunked like [`Self::existing_ids`].
    pub fn filter_by_any_of(&self, field: &str, ids: &[EntityId]) -> RepoResult<Vec<E>> {
        let distinct = distinct_ids(ids);
        let mut rows = Vec::new();
        for chunk in distinct.chunks(self.lookup_chunk_size) {
            rows.extend(self.filter_by(Filter::all().any_of(field, chunk.iter().copied()))?);
        }
        Ok(rows)
    }

    pub fn get_all(&self) -> RepoResult<Vec<E>> {
        self.filter_by(Filter::all())
    }

    pub fn count(&self) -> RepoResult<u64> {
        Ok(self.collection.count(&active(Filter::all()))?)
    }

    pub fn exists(&self, id: EntityId) -> RepoResult<bool> {
        Ok(self.collection.count(&active(Filter::by_id(id)))? > 0)
    }

    /// Returns the subset of `ids` that are active rows.
    ///
    /// Issues one lookup per chunk of distinct ids, independent of how many
    /// times an id repeats in the input.
    pub fn existing_ids(&self, ids: &[EntityId]) -> RepoResult<HashSet<EntityId>> {
        let distinct = distinct_ids(ids);
        let mut found = HashSet::with_capacity(distinct.len());
        for chunk in distinct.chunks(self.lookup_chunk_size) {
            let filter = active(Filter::all().any_of(ID_FIELD, chunk.iter().copied()));
            for doc in self.collection.find(&filter)? {
                let meta: EntityMeta = decode(doc)?;
                found.insert(meta.id);
            }
        }
        Ok(found)
    }

    /// Stamps and persists one new row.
    ///
    /// A nil id is replaced by a fresh one; a caller-chosen id is kept.
    pub fn insert(&self, entity: E) -> RepoResult<E> {
        let mut entity = entity;
        stamp_new(&mut entity, now_epoch_ms());
        self.collection.insert_one(&encode(&entity)?)?;
        debug!(
            "event=entity_insert module=repo status=ok collection={}",
            E::COLLECTION
        );
        Ok(entity)
    }

    /// Stamps and persists many rows in one store call.
    pub fn insert_many(&self, entities: Vec<E>) -> RepoResult<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        let now = now_epoch_ms();
        let mut entities = entities;
        let mut docs = Vec::with_capacity(entities.len());
        for entity in &mut entities {
            stamp_new(entity, now);
            docs.push(encode(entity)?);
        }
        self.collection.insert_many(&docs)?;
        debug!(
            "event=entity_insert_many module=repo status=ok collection={} count={}",
            E::COLLECTION,
            entities.len()
        );
        Ok(entities)
    }

    /// Overwrites the active row `id` with `entity`.
    ///
    /// # Contract
    /// - Full-document overwrite; `inserted_at` is carried over from the
    ///   stored row and `updated_at` is refreshed.
    /// - `NotFound` when `id` is absent or deleted; no row is created.
    pub fn replace(&self, id: EntityId, entity: E) -> RepoResult<E> {
        let current = self.get(id)?;
        let (inserted_at, previous_updated_at) = current.timestamps();

        let mut entity = entity;
        entity.set_id(id);
        entity.set_state(RowState::Active);
        entity.set_timestamps(inserted_at, now_epoch_ms().max(previous_updated_at));

        let replaced = self
            .collection
            .replace_one(&active(Filter::by_id(id)), &encode(&entity)?)?;
        if replaced == 0 {
            return Err(RepoError::not_found(E::COLLECTION, id));
        }
        Ok(entity)
    }

    /// Tombstones the active row `id`.
    pub fn delete(&self, id: EntityId) -> RepoResult<()> {
        let changed = self.tombstone_where(Filter::by_id(id))?;
        if changed == 0 {
            return Err(RepoError::not_found(E::COLLECTION, id));
        }
        Ok(())
    }

    /// Tombstones every active row among `ids`; returns how many changed.
    pub fn delete_many(&self, ids: &[EntityId]) -> RepoResult<usize> {
        let mut changed = 0;
        for chunk in ids.chunks(self.lookup_chunk_size) {
            changed += self.tombstone_where(Filter::all().any_of(ID_FIELD, chunk.iter().copied()))?;
        }
        Ok(changed)
    }

    /// Tombstones every active row matching `filter` in one store call.
    pub fn tombstone_where(&self, filter: Filter) -> RepoResult<usize> {
        let update = Update::new()
            .set(DELETED_FIELD, true)
            .set(UPDATED_AT_FIELD, now_epoch_ms());
        Ok(self.collection.update_many(&active(filter), &update)?)
    }

    pub(crate) fn create_index(&self, spec: &IndexSpec) -> RepoResult<()> {
        Ok(self.collection.create_index(spec)?)
    }
}

fn distinct_ids(ids: &[EntityId]) -> Vec<EntityId> {
    let mut distinct = ids.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    distinct
}

/// Restricts `filter` to rows that are not tombstoned.
fn active(filter: Filter) -> Filter {
    filter.eq(DELETED_FIELD, false)
}

fn stamp_new<E: Document>(entity: &mut E, now: i64) {
    if entity.id().is_nil() {
        entity.set_id(EntityId::generate());
    }
    entity.set_timestamps(now, now);
    entity.set_state(RowState::Active);
}

fn encode<E: Document>(entity: &E) -> RepoResult<Value> {
    serde_json::to_value(entity)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode {}: {err}", E::COLLECTION)))
}

fn decode<T: serde::de::DeserializeOwned>(doc: Value) -> RepoResult<T> {
    serde_json::from_value(doc).map_err(|err| RepoError::InvalidData(err.to_string()))
}

fn decode_active<E: Document>(doc: Value) -> RepoResult<E> {
    let entity: E = decode(doc)?;
    if entity.is_deleted() {
        return Err(RepoError::InvalidData(format!(
            "tombstoned {} row {} escaped the active filter",
            E::COLLECTION,
            entity.id()
        )));
    }
    Ok(entity)
}

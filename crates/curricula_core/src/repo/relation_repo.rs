//! Relation repository: persistence for two-sided mapping rows.
//!
//! # Responsibility
//! - Side-keyed reads, cascade soft-delete and batch writes for one
//!   [`Relation`] type.
//! - Own the partial unique index that keeps active endpoint pairs unique.
//!
//! # Invariants
//! - All reads go through [`ActiveRepository`], so tombstoned rows never leak.
//! - `ux_<collection>_active_pair` covers only `deleted = false` rows; retired
//!   duplicates of a pair may coexist with one active row.

use crate::model::meta::{Document, EntityId, MappingPair, Relation, Side, DELETED_FIELD};
use crate::repo::active_repo::ActiveRepository;
use crate::repo::{ErrorKind, RepoError, RepoResult};
use crate::store::{Filter, IndexSpec, ID_FIELD};
use log::debug;
use rusqlite::Connection;
use std::collections::HashMap;

/// Outcome of [`RelationRepository::update_many`].
///
/// Rows rejected by the store for a semantic reason land in `rejected`; the
/// call itself only fails on transport errors.
#[derive(Debug)]
pub struct UpdateManyReport<R> {
    pub applied: Vec<R>,
    pub rejected: Vec<(R, RepoError)>,
}

impl<R> Default for UpdateManyReport<R> {
    fn default() -> Self {
        Self {
            applied: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

pub struct RelationRepository<'conn, R: Relation> {
    rows: ActiveRepository<'conn, R>,
}

impl<'conn, R: Relation> RelationRepository<'conn, R> {
    /// Opens the repository without touching indexes.
    pub fn new(conn: &'conn Connection) -> RepoResult<Self> {
        Ok(Self {
            rows: ActiveRepository::new(conn)?,
        })
    }

    /// Opens the repository and ensures its indexes exist.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let repo = Self::new(conn)?;
        repo.ensure_indexes()?;
        Ok(repo)
    }

    pub fn with_lookup_chunk_size(self, chunk_size: usize) -> Self {
        Self {
            rows: self.rows.with_lookup_chunk_size(chunk_size),
        }
    }

    /// Generic active-row access for this relation's collection.
    pub fn rows(&self) -> &ActiveRepository<'conn, R> {
        &self.rows
    }

    /// `NotFound` for a missing endpoint entity on `side`.
    pub fn missing_endpoint(side: Side, id: EntityId) -> RepoError {
        RepoError::not_found(R::endpoint_collection(side), id)
    }

    pub fn active_pair_index_name() -> String {
        format!("ux_{}_active_pair", R::COLLECTION)
    }

    /// Creates the active-pair unique index and per-side lookup indexes.
    pub fn ensure_indexes(&self) -> RepoResult<()> {
        self.rows.create_index(
            &IndexSpec::new(Self::active_pair_index_name(), &[R::LEFT_FIELD, R::RIGHT_FIELD])
                .unique()
                .partial(Filter::all().eq(DELETED_FIELD, false)),
        )?;
        self.rows.create_index(&IndexSpec::new(
            format!("ix_{}_left", R::COLLECTION),
            &[R::LEFT_FIELD],
        ))?;
        self.rows.create_index(&IndexSpec::new(
            format!("ix_{}_right", R::COLLECTION),
            &[R::RIGHT_FIELD],
        ))
    }

    pub fn get_by_left_id(&self, left: EntityId) -> RepoResult<Vec<R>> {
        self.get_by_side(Side::Left, left)
    }

    pub fn get_by_right_id(&self, right: EntityId) -> RepoResult<Vec<R>> {
        self.get_by_side(Side::Right, right)
    }

    /// Active rows whose endpoint on `side` equals `id`.
    pub fn get_by_side(&self, side: Side, id: EntityId) -> RepoResult<Vec<R>> {
        self.rows.filter_by(Filter::all().eq(R::field(side), id))
    }

    /// Active rows touching any of `ids` on `side`, keyed by endpoint pair.
    pub fn active_pairs(&self, side: Side, ids: &[EntityId]) -> RepoResult<HashMap<MappingPair, R>> {
        Ok(self
            .rows
            .filter_by_any_of(R::field(side), ids)?
            .into_iter()
            .map(|row| (row.pair(), row))
            .collect())
    }

    pub fn find_mapping(&self, left: EntityId, right: EntityId) -> RepoResult<Option<R>> {
        self.rows.find_one(
            Filter::all()
                .eq(R::LEFT_FIELD, left)
                .eq(R::RIGHT_FIELD, right),
        )
    }

    /// Advisory existence check; the unique index is the real guard.
    pub fn is_mapping_existed(&self, left: EntityId, right: EntityId) -> RepoResult<bool> {
        Ok(self.find_mapping(left, right)?.is_some())
    }

    /// Inserts one row; an active duplicate pair fails with `Conflict`.
    pub fn insert(&self, row: R) -> RepoResult<R> {
        self.rows.insert(row)
    }

    pub fn delete_mappings_by_left_id(&self, left: EntityId) -> RepoResult<usize> {
        self.delete_mappings_by_side(Side::Left, left)
    }

    pub fn delete_mappings_by_right_id(&self, right: EntityId) -> RepoResult<usize> {
        self.delete_mappings_by_side(Side::Right, right)
    }

    /// Tombstones every active row with `id` on `side` in one update.
    pub fn delete_mappings_by_side(&self, side: Side, id: EntityId) -> RepoResult<usize> {
        let changed = self
            .rows
            .tombstone_where(Filter::all().eq(R::field(side), id))?;
        debug!(
            "event=mapping_cascade_delete module=repo status=ok collection={} changed={}",
            R::COLLECTION,
            changed
        );
        Ok(changed)
    }

    /// Inserts all rows in one store call, or none of them.
    pub fn add_many(&self, rows: Vec<R>) -> RepoResult<Vec<R>> {
        self.rows.insert_many(rows)
    }

    /// Replaces each row in order.
    ///
    /// # Contract
    /// - Rows already applied stay applied when a later row is rejected.
    /// - `Conflict` and `NotFound` are reported per row in the report.
    /// - Any other error aborts the loop and is returned.
    pub fn update_many(&self, rows: Vec<R>) -> RepoResult<UpdateManyReport<R>> {
        let mut report = UpdateManyReport::default();
        for row in rows {
            let id = row.id();
            match self.rows.replace(id, row.clone()) {
                Ok(updated) => report.applied.push(updated),
                Err(err) if matches!(err.kind(), ErrorKind::Conflict | ErrorKind::NotFound) => {
                    report.rejected.push((row, err));
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            "event=mapping_update_many module=repo status=ok collection={} applied={} rejected={}",
            R::COLLECTION,
            report.applied.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Right-side entities linked to `left`, in mapping order.
    pub fn get_rights_with_details(
        &self,
        left: EntityId,
        rights: &ActiveRepository<'_, R::Right>,
    ) -> RepoResult<Vec<R::Right>> {
        let ids: Vec<EntityId> = self
            .get_by_left_id(left)?
            .iter()
            .map(R::right_id)
            .collect();
        join_in_order(&ids, rights)
    }

    /// Left-side entities linked to `right`, in mapping order.
    pub fn get_lefts_with_details(
        &self,
        right: EntityId,
        lefts: &ActiveRepository<'_, R::Left>,
    ) -> RepoResult<Vec<R::Left>> {
        let ids: Vec<EntityId> = self
            .get_by_right_id(right)?
            .iter()
            .map(R::left_id)
            .collect();
        join_in_order(&ids, lefts)
    }
}

/// Loads `ids` from `repo` and returns them in `ids` order.
///
/// Endpoints that are themselves tombstoned are omitted.
fn join_in_order<E: Document>(ids: &[EntityId], repo: &ActiveRepository<'_, E>) -> RepoResult<Vec<E>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut by_id: HashMap<EntityId, E> = repo
        .filter_by_any_of(ID_FIELD, ids)?
        .into_iter()
        .map(|entity| (entity.id(), entity))
        .collect();
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::RelationRepository;
    use crate::db::open_db_in_memory;
    use crate::model::mappings::SubjectToolMapping;
    use crate::model::meta::{EntityId, Relation};
    use crate::repo::ErrorKind;

    #[test]
    fn index_name_is_derived_from_collection() {
        assert_eq!(
            RelationRepository::<SubjectToolMapping>::active_pair_index_name(),
            "ux_subject_tool_mappings_active_pair"
        );
    }

    #[test]
    fn ensure_indexes_is_idempotent() {
        let conn = open_db_in_memory().unwrap();
        let repo = RelationRepository::<SubjectToolMapping>::try_new(&conn).unwrap();
        repo.ensure_indexes().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [RelationRepository::<SubjectToolMapping>::active_pair_index_name()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn duplicate_active_pair_is_a_conflict() {
        let conn = open_db_in_memory().unwrap();
        let repo = RelationRepository::<SubjectToolMapping>::try_new(&conn).unwrap();
        let (subject, tool) = (EntityId::generate(), EntityId::generate());

        repo.insert(SubjectToolMapping::link(subject, tool)).unwrap();
        let err = repo
            .insert(SubjectToolMapping::link(subject, tool))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}

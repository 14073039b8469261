//! Mapping reconciliation use-case service.
//!
//! # Responsibility
//! - Batch create, batch update and full-replace patch of relation rows.
//! - Validate endpoint existence with set lookups instead of per-row reads.
//!
//! # Invariants
//! - Batch create never fails on individual rows; invalid or duplicate rows
//!   are dropped and only inserted pairs are returned.
//! - Batch update reports every request exactly once, either accepted or
//!   failed with an [`UpdateFailure`].
//! - Patch is applied inside one savepoint; a rejected patch leaves no trace.

use crate::config::BatchConfig;
use crate::db::with_savepoint;
use crate::model::meta::{Document, EntityId, MappingPair, Relation, Side};
use crate::repo::active_repo::ActiveRepository;
use crate::repo::relation_repo::RelationRepository;
use crate::repo::{ErrorKind, RepoError, RepoResult};
use log::{info, warn};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// One retarget request: the current pair plus the endpoint(s) to move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingUpdate {
    pub current: MappingPair,
    pub new_left: Option<EntityId>,
    pub new_right: Option<EntityId>,
}

impl MappingUpdate {
    pub fn new(current: MappingPair) -> Self {
        Self {
            current,
            new_left: None,
            new_right: None,
        }
    }

    pub fn with_left(mut self, left: EntityId) -> Self {
        self.new_left = Some(left);
        self
    }

    pub fn with_right(mut self, right: EntityId) -> Self {
        self.new_right = Some(right);
        self
    }

    /// Pair the row should hold after the update.
    pub fn target(&self) -> MappingPair {
        MappingPair::new(
            self.new_left.unwrap_or(self.current.left),
            self.new_right.unwrap_or(self.current.right),
        )
    }
}

/// Why a batch update request was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFailure {
    /// No active row holds the current pair.
    MappingNotFound,
    /// An earlier request in the batch already targets the same row.
    DuplicateRequest,
    LeftNotFound,
    RightNotFound,
    /// The resulting pair is held by another active row or claimed earlier.
    MappingExists,
}

impl Display for UpdateFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::MappingNotFound => "mapping does not exist",
            Self::DuplicateRequest => "mapping is already targeted by an earlier request",
            Self::LeftNotFound => "new left entity does not exist",
            Self::RightNotFound => "new right entity does not exist",
            Self::MappingExists => "resulting mapping already exists",
        };
        f.write_str(message)
    }
}

/// Result of [`MappingService::update_mappings_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdateOutcome {
    pub accepted: Vec<MappingUpdate>,
    pub failed: Vec<(MappingUpdate, UpdateFailure)>,
}

/// Result of [`MappingService::patch_mapping`], as opposite-side ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub retired: Vec<EntityId>,
    pub added: Vec<EntityId>,
    pub kept: Vec<EntityId>,
}

/// Use-case service for one relation type `R`.
pub struct MappingService<'conn, R: Relation> {
    conn: &'conn Connection,
    relations: RelationRepository<'conn, R>,
    lefts: ActiveRepository<'conn, R::Left>,
    rights: ActiveRepository<'conn, R::Right>,
    max_batch_size: usize,
}

impl<'conn, R: Relation> MappingService<'conn, R> {
    /// Creates the service and ensures the relation's indexes exist.
    pub fn new(conn: &'conn Connection, batch: BatchConfig) -> RepoResult<Self> {
        let chunk = batch.lookup_chunk_size;
        Ok(Self {
            conn,
            relations: RelationRepository::try_new(conn)?.with_lookup_chunk_size(chunk),
            lefts: ActiveRepository::new(conn)?.with_lookup_chunk_size(chunk),
            rights: ActiveRepository::new(conn)?.with_lookup_chunk_size(chunk),
            max_batch_size: batch.max_batch_size,
        })
    }

    pub fn relations(&self) -> &RelationRepository<'conn, R> {
        &self.relations
    }

    /// Creates one mapping.
    ///
    /// # Contract
    /// - `NotFound` when either endpoint is missing or deleted.
    /// - `Conflict` when the active pair already exists, whether caught by
    ///   the advisory check or by the unique index.
    pub fn create_mapping(&self, left: EntityId, right: EntityId) -> RepoResult<R> {
        self.require_endpoint(Side::Left, left)?;
        self.require_endpoint(Side::Right, right)?;
        if self.relations.is_mapping_existed(left, right)? {
            return Err(RepoError::Conflict {
                collection: R::COLLECTION,
                detail: format!("mapping {} already exists", MappingPair::new(left, right)),
            });
        }
        self.relations.insert(R::link(left, right))
    }

    /// Inserts every valid, new pair of `pairs` and returns exactly those.
    ///
    /// Pairs that already exist, reference a missing endpoint or repeat an
    /// earlier pair of the batch are dropped without a reason.
    pub fn create_mapping_batch(&self, pairs: &[MappingPair]) -> RepoResult<Vec<MappingPair>> {
        self.check_batch_size(pairs.len())?;
        let started_at = Instant::now();

        let lefts: Vec<EntityId> = pairs.iter().map(|pair| pair.left).collect();
        let rights: Vec<EntityId> = pairs.iter().map(|pair| pair.right).collect();
        let known_lefts = self.lefts.existing_ids(&lefts)?;
        let known_rights = self.rights.existing_ids(&rights)?;
        let existing = self.relations.active_pairs(Side::Left, &lefts)?;

        let mut seen = HashSet::with_capacity(pairs.len());
        let candidates: Vec<MappingPair> = pairs
            .iter()
            .copied()
            .filter(|pair| {
                known_lefts.contains(&pair.left)
                    && known_rights.contains(&pair.right)
                    && !existing.contains_key(pair)
                    && seen.insert(*pair)
            })
            .collect();

        let inserted = if candidates.is_empty() {
            Vec::new()
        } else {
            with_savepoint(self.conn, "mapping_create_batch", || {
                self.insert_candidates(&candidates)
            })?
        };

        info!(
            "event=mapping_create_batch module=service status=ok collection={} requested={} inserted={} duration_ms={}",
            R::COLLECTION,
            pairs.len(),
            inserted.len(),
            started_at.elapsed().as_millis()
        );
        Ok(inserted)
    }

    /// Retargets existing mappings, reporting a reason for each rejection.
    pub fn update_mappings_batch(&self, requests: &[MappingUpdate]) -> RepoResult<BatchUpdateOutcome> {
        self.check_batch_size(requests.len())?;
        let started_at = Instant::now();

        let new_lefts: Vec<EntityId> = requests.iter().filter_map(|req| req.new_left).collect();
        let new_rights: Vec<EntityId> = requests.iter().filter_map(|req| req.new_right).collect();
        let known_lefts = self.lefts.existing_ids(&new_lefts)?;
        let known_rights = self.rights.existing_ids(&new_rights)?;

        let touched_lefts: Vec<EntityId> = requests
            .iter()
            .flat_map(|req| [req.current.left, req.target().left])
            .collect();
        let active = self.relations.active_pairs(Side::Left, &touched_lefts)?;

        let mut failed = Vec::new();
        let mut queued: Vec<(MappingUpdate, R)> = Vec::new();
        let mut claimed_rows = HashSet::new();
        let mut claimed_pairs = HashSet::new();

        for request in requests {
            let verdict = self.plan_update(
                request,
                &active,
                &known_lefts,
                &known_rights,
                &claimed_rows,
                &claimed_pairs,
            );
            match verdict {
                Ok(row) => {
                    claimed_rows.insert(row.id());
                    claimed_pairs.insert(request.target());
                    queued.push((*request, row));
                }
                Err(reason) => failed.push((*request, reason)),
            }
        }

        let accepted = self.apply_planned(queued, &mut failed)?;

        info!(
            "event=mapping_update_batch module=service status=ok collection={} requested={} accepted={} failed={} duration_ms={}",
            R::COLLECTION,
            requests.len(),
            accepted.len(),
            failed.len(),
            started_at.elapsed().as_millis()
        );
        Ok(BatchUpdateOutcome { accepted, failed })
    }

    /// Makes the opposite-side set of `fixed` equal to `desired`.
    ///
    /// # Contract
    /// - `fixed` must be an active entity on `side`; every desired id must be
    ///   an active entity on the opposite side. Otherwise `NotFound` and
    ///   nothing changes.
    /// - Only removals are retired and only additions inserted; unchanged
    ///   rows keep their ids and timestamps.
    /// - Runs inside one savepoint.
    pub fn patch_mapping(
        &self,
        side: Side,
        fixed: EntityId,
        desired: &[EntityId],
    ) -> RepoResult<PatchOutcome> {
        let started_at = Instant::now();
        let other = side.opposite();

        let mut seen = HashSet::with_capacity(desired.len());
        let desired: Vec<EntityId> = desired.iter().copied().filter(|id| seen.insert(*id)).collect();

        let outcome = with_savepoint(self.conn, "mapping_patch", || {
            self.require_endpoint(side, fixed)?;
            let known = self.existing_on(other, &desired)?;
            if let Some(missing) = desired.iter().find(|id| !known.contains(*id)) {
                return Err(RelationRepository::<R>::missing_endpoint(other, *missing));
            }

            let mut outcome = PatchOutcome::default();
            let mut to_retire = Vec::new();
            let mut present = HashSet::new();
            for row in self.relations.get_by_side(side, fixed)? {
                let other_id = row.id_on(other);
                if seen.contains(&other_id) {
                    present.insert(other_id);
                    outcome.kept.push(other_id);
                } else {
                    to_retire.push(row.id());
                    outcome.retired.push(other_id);
                }
            }
            self.relations.rows().delete_many(&to_retire)?;

            let additions: Vec<R> = desired
                .iter()
                .filter(|id| !present.contains(*id))
                .map(|id| R::link_on(side, fixed, *id))
                .collect();
            for row in self.relations.add_many(additions)? {
                outcome.added.push(row.id_on(other));
            }
            Ok(outcome)
        })?;

        info!(
            "event=mapping_patch module=service status=ok collection={} retired={} added={} kept={} duration_ms={}",
            R::COLLECTION,
            outcome.retired.len(),
            outcome.added.len(),
            outcome.kept.len(),
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }

    pub fn is_mapping_existed(&self, left: EntityId, right: EntityId) -> RepoResult<bool> {
        self.relations.is_mapping_existed(left, right)
    }

    /// Opposite-side ids actively linked to `id` on `side`.
    pub fn get_other_ids(&self, side: Side, id: EntityId) -> RepoResult<Vec<EntityId>> {
        let other = side.opposite();
        Ok(self
            .relations
            .get_by_side(side, id)?
            .iter()
            .map(|row| row.id_on(other))
            .collect())
    }

    /// Tombstones every mapping with `id` on `side`; returns how many changed.
    pub fn delete_mappings(&self, side: Side, id: EntityId) -> RepoResult<usize> {
        self.relations.delete_mappings_by_side(side, id)
    }

    pub fn get_rights_with_details(&self, left: EntityId) -> RepoResult<Vec<R::Right>> {
        self.relations.get_rights_with_details(left, &self.rights)
    }

    pub fn get_lefts_with_details(&self, right: EntityId) -> RepoResult<Vec<R::Left>> {
        self.relations.get_lefts_with_details(right, &self.lefts)
    }

    fn check_batch_size(&self, len: usize) -> RepoResult<()> {
        if len == 0 {
            return Err(RepoError::InvalidArgument("batch must not be empty".to_string()));
        }
        if len > self.max_batch_size {
            return Err(RepoError::InvalidArgument(format!(
                "batch of {len} exceeds the limit of {}",
                self.max_batch_size
            )));
        }
        Ok(())
    }

    fn require_endpoint(&self, side: Side, id: EntityId) -> RepoResult<()> {
        let exists = match side {
            Side::Left => self.lefts.exists(id)?,
            Side::Right => self.rights.exists(id)?,
        };
        if exists {
            Ok(())
        } else {
            Err(RelationRepository::<R>::missing_endpoint(side, id))
        }
    }

    fn existing_on(&self, side: Side, ids: &[EntityId]) -> RepoResult<HashSet<EntityId>> {
        match side {
            Side::Left => self.lefts.existing_ids(ids),
            Side::Right => self.rights.existing_ids(ids),
        }
    }

    /// One `insert_many`; on a unique-index rejection, retries row by row and
    /// drops the rows that collide.
    fn insert_candidates(&self, candidates: &[MappingPair]) -> RepoResult<Vec<MappingPair>> {
        let rows = candidates.iter().map(|pair| R::link(pair.left, pair.right)).collect();
        match self.relations.add_many(rows) {
            Ok(inserted) => Ok(inserted.iter().map(R::pair).collect()),
            Err(err) if err.is_conflict() => {
                warn!(
                    "event=mapping_create_batch module=service status=error collection={} error_code=bulk_insert_conflict fallback=per_row",
                    R::COLLECTION
                );
                let mut inserted = Vec::with_capacity(candidates.len());
                for pair in candidates {
                    match self.relations.insert(R::link(pair.left, pair.right)) {
                        Ok(row) => inserted.push(row.pair()),
                        Err(err) if err.is_conflict() => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(inserted)
            }
            Err(err) => Err(err),
        }
    }

    /// Writes planned rows; rows the store rejects at apply time are
    /// reported against their request.
    fn apply_planned(
        &self,
        queued: Vec<(MappingUpdate, R)>,
        failed: &mut Vec<(MappingUpdate, UpdateFailure)>,
    ) -> RepoResult<Vec<MappingUpdate>> {
        let by_row: HashMap<EntityId, MappingUpdate> = queued
            .iter()
            .map(|(request, row)| (row.id(), *request))
            .collect();
        let report = self
            .relations
            .update_many(queued.into_iter().map(|(_, row)| row).collect())?;

        let mut accepted = Vec::with_capacity(report.applied.len());
        for row in &report.applied {
            if let Some(request) = by_row.get(&row.id()) {
                accepted.push(*request);
            }
        }
        for (row, err) in &report.rejected {
            let reason = match err.kind() {
                ErrorKind::NotFound => UpdateFailure::MappingNotFound,
                _ => UpdateFailure::MappingExists,
            };
            if let Some(request) = by_row.get(&row.id()) {
                warn!(
                    "event=mapping_update_batch module=service status=error collection={} error_code=apply_rejected reason={}",
                    R::COLLECTION,
                    reason
                );
                failed.push((*request, reason));
            }
        }
        Ok(accepted)
    }

    fn plan_update(
        &self,
        request: &MappingUpdate,
        active: &HashMap<MappingPair, R>,
        known_lefts: &HashSet<EntityId>,
        known_rights: &HashSet<EntityId>,
        claimed_rows: &HashSet<EntityId>,
        claimed_pairs: &HashSet<MappingPair>,
    ) -> Result<R, UpdateFailure> {
        let current = active
            .get(&request.current)
            .ok_or(UpdateFailure::MappingNotFound)?;
        if claimed_rows.contains(&current.id()) {
            return Err(UpdateFailure::DuplicateRequest);
        }
        if request.new_left.is_some_and(|id| !known_lefts.contains(&id)) {
            return Err(UpdateFailure::LeftNotFound);
        }
        if request.new_right.is_some_and(|id| !known_rights.contains(&id)) {
            return Err(UpdateFailure::RightNotFound);
        }

        let target = request.target();
        let held_by_other = active
            .get(&target)
            .is_some_and(|holder| holder.id() != current.id());
        if held_by_other || claimed_pairs.contains(&target) {
            return Err(UpdateFailure::MappingExists);
        }

        let mut row = current.clone();
        row.set_left_id(target.left);
        row.set_right_id(target.right);
        Ok(row)
    }
}

//! Unit of work: one connection, many repositories.
//!
//! # Responsibility
//! - Hand out entity, relation and mapping-service instances bound to the
//!   same connection and batch limits.
//! - Run caller closures inside a named savepoint.
//!
//! # Invariants
//! - `save()` is a logical checkpoint only. Writes are durable as soon as
//!   each repository call returns; `save()` never commits or rolls back.

use crate::config::BatchConfig;
use crate::db::with_savepoint;
use crate::model::catalog::{
    Combo, CourseOutcome, Curriculum, Program, ProgramOutcome, Subject, Tool,
};
use crate::model::mappings::{
    CloPloMapping, SubjectComboMapping, SubjectCurriculumMapping, SubjectToolMapping,
};
use crate::model::meta::{Document, Relation};
use crate::repo::active_repo::ActiveRepository;
use crate::repo::relation_repo::RelationRepository;
use crate::repo::{RepoError, RepoResult};
use crate::service::mapping_service::MappingService;
use log::info;
use rusqlite::Connection;
use std::cell::Cell;

pub struct UnitOfWork<'conn> {
    conn: &'conn Connection,
    batch: BatchConfig,
    save_points: Cell<u64>,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn new(conn: &'conn Connection, batch: BatchConfig) -> Self {
        Self {
            conn,
            batch,
            save_points: Cell::new(0),
        }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn batch_config(&self) -> BatchConfig {
        self.batch
    }

    pub fn entities<E: Document>(&self) -> RepoResult<ActiveRepository<'conn, E>> {
        Ok(ActiveRepository::new(self.conn)?.with_lookup_chunk_size(self.batch.lookup_chunk_size))
    }

    pub fn relations<R: Relation>(&self) -> RepoResult<RelationRepository<'conn, R>> {
        Ok(RelationRepository::try_new(self.conn)?
            .with_lookup_chunk_size(self.batch.lookup_chunk_size))
    }

    pub fn mappings<R: Relation>(&self) -> RepoResult<MappingService<'conn, R>> {
        MappingService::new(self.conn, self.batch)
    }

    /// Creates the active-pair indexes of every relation type.
    pub fn ensure_relation_indexes(&self) -> RepoResult<()> {
        RelationRepository::<CloPloMapping>::new(self.conn)?.ensure_indexes()?;
        RelationRepository::<SubjectToolMapping>::new(self.conn)?.ensure_indexes()?;
        RelationRepository::<SubjectComboMapping>::new(self.conn)?.ensure_indexes()?;
        RelationRepository::<SubjectCurriculumMapping>::new(self.conn)?.ensure_indexes()
    }

    /// Active row count per collection, entities first.
    pub fn active_counts(&self) -> RepoResult<Vec<(&'static str, u64)>> {
        Ok(vec![
            count_of::<Subject>(self.conn)?,
            count_of::<Program>(self.conn)?,
            count_of::<ProgramOutcome>(self.conn)?,
            count_of::<CourseOutcome>(self.conn)?,
            count_of::<Tool>(self.conn)?,
            count_of::<Combo>(self.conn)?,
            count_of::<Curriculum>(self.conn)?,
            count_of::<CloPloMapping>(self.conn)?,
            count_of::<SubjectToolMapping>(self.conn)?,
            count_of::<SubjectComboMapping>(self.conn)?,
            count_of::<SubjectCurriculumMapping>(self.conn)?,
        ])
    }

    /// Runs `work` inside savepoint `name`; an `Err` undoes all of its writes.
    pub fn atomically<T, F>(&self, name: &'static str, work: F) -> RepoResult<T>
    where
        F: FnOnce(&Self) -> RepoResult<T>,
    {
        with_savepoint::<T, RepoError, _>(self.conn, name, || work(self))
    }

    /// Marks a logical checkpoint and returns how many have been taken.
    pub fn save(&self) -> u64 {
        let taken = self.save_points.get() + 1;
        self.save_points.set(taken);
        info!("event=uow_save module=repo status=ok save_points={taken}");
        taken
    }
}

fn count_of<E: Document>(conn: &Connection) -> RepoResult<(&'static str, u64)> {
    Ok((E::COLLECTION, ActiveRepository::<E>::new(conn)?.count()?))
}

#[cfg(test)]
mod tests {
    use super::UnitOfWork;
    use crate::config::BatchConfig;
    use crate::db::open_db_in_memory;
    use crate::model::catalog::{Subject, Tool};
    use crate::model::mappings::SubjectToolMapping;
    use crate::model::meta::{EntityId, MappingPair};
    use crate::repo::ErrorKind;
    use crate::repo::RepoError;

    #[test]
    fn save_counts_checkpoints() {
        let conn = open_db_in_memory().unwrap();
        let uow = UnitOfWork::new(&conn, BatchConfig::default());
        assert_eq!(uow.save(), 1);
        assert_eq!(uow.save(), 2);
    }

    #[test]
    fn atomically_discards_writes_on_error() {
        let conn = open_db_in_memory().unwrap();
        let uow = UnitOfWork::new(&conn, BatchConfig::default());

        let err = uow
            .atomically("seed_then_fail", |uow| {
                uow.entities::<Subject>()?
                    .insert(Subject::new("CS101", "Intro", 3))?;
                Err::<(), _>(RepoError::InvalidArgument("abort".to_string()))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(uow.entities::<Subject>().unwrap().count().unwrap(), 0);

        uow.atomically("seed", |uow| {
            uow.entities::<Tool>()?.insert(Tool::new("MATLAB"))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(uow.entities::<Tool>().unwrap().count().unwrap(), 1);
    }

    #[test]
    fn active_counts_cover_every_collection() {
        let conn = open_db_in_memory().unwrap();
        let uow = UnitOfWork::new(&conn, BatchConfig::default());
        uow.ensure_relation_indexes().unwrap();

        let counts = uow.active_counts().unwrap();
        assert_eq!(counts.len(), 11);
        assert!(counts.iter().all(|(_, count)| *count == 0));
        assert_eq!(counts[0].0, "subjects");
    }

    #[test]
    fn batch_limits_reach_the_mapping_service() {
        let conn = open_db_in_memory().unwrap();
        let batch = BatchConfig {
            max_batch_size: 1,
            ..BatchConfig::default()
        };
        let uow = UnitOfWork::new(&conn, batch);
        assert_eq!(uow.batch_config(), batch);

        let pairs = [
            MappingPair::new(EntityId::generate(), EntityId::generate()),
            MappingPair::new(EntityId::generate(), EntityId::generate()),
        ];
        let err = uow
            .mappings::<SubjectToolMapping>()
            .unwrap()
            .create_mapping_batch(&pairs)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

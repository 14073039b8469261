//! Core domain logic for the curricula catalog.
//! This crate is the single source of truth for soft-delete and mapping invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{BatchConfig, ConfigError, CoreConfig, DatabaseConfig, LoggingConfig};
pub use db::{open_db, open_db_from_config, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::meta::{Document, EntityId, EntityMeta, MappingPair, Relation, RowState, Side};
pub use repo::active_repo::ActiveRepository;
pub use repo::relation_repo::{RelationRepository, UpdateManyReport};
pub use repo::unit_of_work::UnitOfWork;
pub use repo::{ErrorKind, RepoError, RepoResult};
pub use service::mapping_service::{
    BatchUpdateOutcome, MappingService, MappingUpdate, PatchOutcome, UpdateFailure,
};
pub use store::{DocumentStore, Filter, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Domain model for curriculum catalog entities and their mappings.
//!
//! # Responsibility
//! - Define the base document shape shared by every stored entity.
//! - Define the catalog entities and the relation rows linking them.
//!
//! # Invariants
//! - Every stored object is identified by a stable `EntityId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod catalog;
pub mod mappings;
pub mod meta;

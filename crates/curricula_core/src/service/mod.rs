//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep mapping lifecycle decisions out of the persistence layer.

pub mod mapping_service;

//! Curriculum catalog entities: the endpoints that relations link together.
//!
//! These are plain records; all lifecycle rules come from the generic
//! repository through the embedded [`EntityMeta`].

use crate::impl_document;
use crate::model::meta::{EntityId, EntityMeta};
use serde::{Deserialize, Serialize};

/// A taught subject (course).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub code: String,
    pub name: String,
    pub credits: u32,
}

impl Subject {
    pub fn new(code: impl Into<String>, name: impl Into<String>, credits: u32) -> Self {
        Self {
            meta: EntityMeta::default(),
            code: code.into(),
            name: name.into(),
            credits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub code: String,
    pub name: String,
}

impl Program {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::default(),
            code: code.into(),
            name: name.into(),
        }
    }
}

/// Program learning outcome (PLO), owned by one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramOutcome {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub program_id: EntityId,
    pub code: String,
    pub description: String,
}

impl ProgramOutcome {
    pub fn new(
        program_id: EntityId,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            meta: EntityMeta::default(),
            program_id,
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Course learning outcome (CLO), owned by one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseOutcome {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub subject_id: EntityId,
    pub code: String,
    pub description: String,
}

impl CourseOutcome {
    pub fn new(
        subject_id: EntityId,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            meta: EntityMeta::default(),
            subject_id,
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Teaching tool or material used by subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    pub description: Option<String>,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::default(),
            name: name.into(),
            description: None,
        }
    }
}

/// Elective group a subject can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combo {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
}

impl Combo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::default(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub program_id: EntityId,
    pub name: String,
    /// Intake year the curriculum applies to.
    pub year: u16,
}

impl Curriculum {
    pub fn new(program_id: EntityId, name: impl Into<String>, year: u16) -> Self {
        Self {
            meta: EntityMeta::default(),
            program_id,
            name: name.into(),
            year,
        }
    }
}

impl_document!(Subject, "subjects");
impl_document!(Program, "programs");
impl_document!(ProgramOutcome, "program_outcomes");
impl_document!(CourseOutcome, "course_outcomes");
impl_document!(Tool, "tools");
impl_document!(Combo, "combos");
impl_document!(Curriculum, "curricula");

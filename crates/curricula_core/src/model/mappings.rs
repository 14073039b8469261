//! Many-to-many relation rows between catalog entities.
//!
//! # Invariants
//! - Each row carries exactly two endpoint ids plus [`EntityMeta`].
//! - Among active rows an endpoint pair appears at most once; the store
//!   enforces this with a partial unique index (see `repo::relation_repo`).

use crate::impl_document;
use crate::model::catalog::{Combo, CourseOutcome, Curriculum, ProgramOutcome, Subject, Tool};
use crate::model::meta::{EntityId, EntityMeta, Relation};
use serde::{Deserialize, Serialize};

/// Course outcome (left) contributes to program outcome (right).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloPloMapping {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub course_outcome_id: EntityId,
    pub program_outcome_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectToolMapping {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub subject_id: EntityId,
    pub tool_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectComboMapping {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub subject_id: EntityId,
    pub combo_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCurriculumMapping {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub subject_id: EntityId,
    pub curriculum_id: EntityId,
}

macro_rules! impl_relation {
    ($ty:ty, $collection:literal, $left:ty => $left_field:ident, $right:ty => $right_field:ident) => {
        impl_document!($ty, $collection);

        impl Relation for $ty {
            type Left = $left;
            type Right = $right;

            const LEFT_FIELD: &'static str = stringify!($left_field);
            const RIGHT_FIELD: &'static str = stringify!($right_field);

            fn link(left: EntityId, right: EntityId) -> Self {
                Self {
                    meta: EntityMeta::default(),
                    $left_field: left,
                    $right_field: right,
                }
            }

            fn left_id(&self) -> EntityId {
                self.$left_field
            }

            fn right_id(&self) -> EntityId {
                self.$right_field
            }

            fn set_left_id(&mut self, id: EntityId) {
                self.$left_field = id;
            }

            fn set_right_id(&mut self, id: EntityId) {
                self.$right_field = id;
            }
        }
    };
}

impl_relation!(
    CloPloMapping,
    "clo_plo_mappings",
    CourseOutcome => course_outcome_id,
    ProgramOutcome => program_outcome_id
);
impl_relation!(
    SubjectToolMapping,
    "subject_tool_mappings",
    Subject => subject_id,
    Tool => tool_id
);
impl_relation!(
    SubjectComboMapping,
    "subject_combo_mappings",
    Subject => subject_id,
    Combo => combo_id
);
impl_relation!(
    SubjectCurriculumMapping,
    "subject_curriculum_mappings",
    Subject => subject_id,
    Curriculum => curriculum_id
);

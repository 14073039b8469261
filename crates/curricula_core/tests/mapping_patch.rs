use curricula_core::config::BatchConfig;
use curricula_core::db::open_db_in_memory;
use curricula_core::model::catalog::{Combo, Curriculum, Program, Subject, Tool};
use curricula_core::model::mappings::{
    SubjectComboMapping, SubjectCurriculumMapping, SubjectToolMapping,
};
use curricula_core::model::meta::{Document, EntityId, Side};
use curricula_core::repo::unit_of_work::UnitOfWork;
use curricula_core::repo::ErrorKind;
use curricula_core::store::{DocumentStore, Filter};
use std::collections::HashSet;

fn ids<E: Document>(entities: &[E]) -> Vec<EntityId> {
    entities.iter().map(Document::id).collect()
}

#[test]
fn patch_makes_the_set_match_and_retires_the_rest() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE201", "Design", 3))
        .unwrap();
    let tools = uow
        .entities::<Tool>()
        .unwrap()
        .insert_many((0..5).map(|n| Tool::new(format!("Tool {n}"))).collect())
        .unwrap();
    let tool_ids = ids(&tools);
    let service = uow.mappings::<SubjectToolMapping>().unwrap();

    // Starts with {t0, t1, t3}.
    for tool in [tool_ids[0], tool_ids[1], tool_ids[3]] {
        service.create_mapping(subject.id(), tool).unwrap();
    }
    let kept_row = service
        .relations()
        .find_mapping(subject.id(), tool_ids[1])
        .unwrap()
        .unwrap();

    let desired = [tool_ids[1], tool_ids[2], tool_ids[4], tool_ids[2]];
    let outcome = service
        .patch_mapping(Side::Left, subject.id(), &desired)
        .unwrap();

    assert_eq!(outcome.kept, vec![tool_ids[1]]);
    assert_eq!(outcome.added, vec![tool_ids[2], tool_ids[4]]);
    assert_eq!(
        outcome.retired.iter().copied().collect::<HashSet<_>>(),
        HashSet::from([tool_ids[0], tool_ids[3]])
    );

    let others: HashSet<EntityId> = service
        .get_other_ids(Side::Left, subject.id())
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(others, HashSet::from([tool_ids[1], tool_ids[2], tool_ids[4]]));

    let unchanged = service
        .relations()
        .find_mapping(subject.id(), tool_ids[1])
        .unwrap()
        .unwrap();
    assert_eq!(unchanged, kept_row);

    let retired = DocumentStore::new(&conn)
        .collection("subject_tool_mappings")
        .unwrap()
        .find(
            &Filter::all()
                .eq("subject_id", subject.id())
                .eq("deleted", true),
        )
        .unwrap();
    assert_eq!(retired.len(), 2);
}

#[test]
fn patch_from_the_right_side() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subjects = uow
        .entities::<Subject>()
        .unwrap()
        .insert_many(
            (0..3)
                .map(|n| Subject::new(format!("SUB{n}"), "Subject", 3))
                .collect(),
        )
        .unwrap();
    let combo = uow
        .entities::<Combo>()
        .unwrap()
        .insert(Combo::new("AI track"))
        .unwrap();
    let subject_ids = ids(&subjects);
    let service = uow.mappings::<SubjectComboMapping>().unwrap();
    service.create_mapping(subject_ids[0], combo.id()).unwrap();

    let outcome = service
        .patch_mapping(Side::Right, combo.id(), &subject_ids[1..])
        .unwrap();

    assert_eq!(outcome.retired, vec![subject_ids[0]]);
    assert_eq!(outcome.added, subject_ids[1..].to_vec());
    assert!(outcome.kept.is_empty());
    assert_eq!(
        service.get_other_ids(Side::Right, combo.id()).unwrap(),
        subject_ids[1..].to_vec()
    );
}

#[test]
fn patch_with_empty_set_retires_everything() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE201", "Design", 3))
        .unwrap();
    let tool = uow
        .entities::<Tool>()
        .unwrap()
        .insert(Tool::new("Git"))
        .unwrap();
    let service = uow.mappings::<SubjectToolMapping>().unwrap();
    service.create_mapping(subject.id(), tool.id()).unwrap();

    let outcome = service.patch_mapping(Side::Left, subject.id(), &[]).unwrap();

    assert_eq!(outcome.retired, vec![tool.id()]);
    assert!(service
        .get_other_ids(Side::Left, subject.id())
        .unwrap()
        .is_empty());
}

#[test]
fn patch_with_unknown_id_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE201", "Design", 3))
        .unwrap();
    let tools = uow
        .entities::<Tool>()
        .unwrap()
        .insert_many(vec![Tool::new("Git"), Tool::new("Docker")])
        .unwrap();
    let service = uow.mappings::<SubjectToolMapping>().unwrap();
    service.create_mapping(subject.id(), tools[0].id()).unwrap();

    let err = service
        .patch_mapping(
            Side::Left,
            subject.id(),
            &[tools[1].id(), EntityId::generate()],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        service.get_other_ids(Side::Left, subject.id()).unwrap(),
        vec![tools[0].id()]
    );

    let err = service
        .patch_mapping(Side::Left, EntityId::generate(), &[tools[1].id()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(service.relations().rows().count().unwrap(), 1);
}

#[test]
fn create_check_delete_round_trip() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let program = uow
        .entities::<Program>()
        .unwrap()
        .insert(Program::new("BSE", "Software Engineering"))
        .unwrap();
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE101", "Intro", 3))
        .unwrap();
    let curriculum = uow
        .entities::<Curriculum>()
        .unwrap()
        .insert(Curriculum::new(program.id(), "K2026", 2026))
        .unwrap();
    let service = uow.mappings::<SubjectCurriculumMapping>().unwrap();

    service
        .create_mapping(subject.id(), curriculum.id())
        .unwrap();
    let err = service
        .create_mapping(subject.id(), curriculum.id())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(service
        .is_mapping_existed(subject.id(), curriculum.id())
        .unwrap());

    assert_eq!(service.delete_mappings(Side::Left, subject.id()).unwrap(), 1);
    assert!(service
        .get_other_ids(Side::Left, subject.id())
        .unwrap()
        .is_empty());
    assert_eq!(uow.save(), 1);
}

#[test]
fn create_mapping_requires_live_endpoints() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subjects = uow.entities::<Subject>().unwrap();
    let subject = subjects.insert(Subject::new("SE101", "Intro", 3)).unwrap();
    let tool = uow
        .entities::<Tool>()
        .unwrap()
        .insert(Tool::new("Git"))
        .unwrap();
    let service = uow.mappings::<SubjectToolMapping>().unwrap();

    let err = service
        .create_mapping(subject.id(), EntityId::generate())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    subjects.delete(subject.id()).unwrap();
    let err = service.create_mapping(subject.id(), tool.id()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(service.relations().rows().count().unwrap(), 0);
}

#[test]
fn details_reads_resolve_both_sides() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE101", "Intro", 3))
        .unwrap();
    let tools = uow
        .entities::<Tool>()
        .unwrap()
        .insert_many(vec![Tool::new("Git"), Tool::new("Docker")])
        .unwrap();
    let service = uow.mappings::<SubjectToolMapping>().unwrap();
    service
        .patch_mapping(Side::Left, subject.id(), &ids(&tools))
        .unwrap();

    let rights = service.get_rights_with_details(subject.id()).unwrap();
    assert_eq!(rights, tools);
    let lefts = service.get_lefts_with_details(tools[1].id()).unwrap();
    assert_eq!(lefts, vec![subject]);
}

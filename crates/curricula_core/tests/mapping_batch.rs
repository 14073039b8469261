use curricula_core::config::BatchConfig;
use curricula_core::db::open_db_in_memory;
use curricula_core::model::catalog::{CourseOutcome, Program, ProgramOutcome, Subject};
use curricula_core::model::mappings::CloPloMapping;
use curricula_core::model::meta::{Document, EntityId, MappingPair};
use curricula_core::repo::unit_of_work::UnitOfWork;
use curricula_core::repo::ErrorKind;
use curricula_core::service::mapping_service::{MappingUpdate, UpdateFailure};
use curricula_core::store::{DocumentStore, Filter};
use rusqlite::Connection;

struct Outcomes {
    clos: Vec<EntityId>,
    plos: Vec<EntityId>,
}

fn seed_outcomes(conn: &Connection, clo_count: usize, plo_count: usize) -> Outcomes {
    let uow = UnitOfWork::new(conn, BatchConfig::default());
    let subject = uow
        .entities::<Subject>()
        .unwrap()
        .insert(Subject::new("SE101", "Software Engineering", 3))
        .unwrap();
    let program = uow
        .entities::<Program>()
        .unwrap()
        .insert(Program::new("BSE", "Bachelor of Software Engineering"))
        .unwrap();

    let clos = uow
        .entities::<CourseOutcome>()
        .unwrap()
        .insert_many(
            (0..clo_count)
                .map(|n| CourseOutcome::new(subject.id(), format!("CLO{n}"), "outcome"))
                .collect(),
        )
        .unwrap();
    let plos = uow
        .entities::<ProgramOutcome>()
        .unwrap()
        .insert_many(
            (0..plo_count)
                .map(|n| ProgramOutcome::new(program.id(), format!("PLO{n}"), "outcome"))
                .collect(),
        )
        .unwrap();

    Outcomes {
        clos: clos.iter().map(Document::id).collect(),
        plos: plos.iter().map(Document::id).collect(),
    }
}

#[test]
fn create_batch_drops_existing_missing_and_repeated_pairs() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 3, 3);
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();

    let existing = [
        MappingPair::new(seeded.clos[0], seeded.plos[0]),
        MappingPair::new(seeded.clos[1], seeded.plos[1]),
    ];
    for pair in existing {
        service.create_mapping(pair.left, pair.right).unwrap();
    }
    let before = service.relations().rows().count().unwrap();

    let valid = vec![
        MappingPair::new(seeded.clos[0], seeded.plos[1]),
        MappingPair::new(seeded.clos[2], seeded.plos[2]),
        MappingPair::new(seeded.clos[1], seeded.plos[0]),
    ];
    let missing = [
        MappingPair::new(EntityId::generate(), seeded.plos[0]),
        MappingPair::new(seeded.clos[2], EntityId::generate()),
    ];
    let mut candidates: Vec<MappingPair> = Vec::new();
    candidates.extend(existing);
    candidates.extend(valid.iter().copied());
    candidates.extend(missing);
    candidates.push(valid[0]);

    let inserted = service.create_mapping_batch(&candidates).unwrap();

    assert_eq!(inserted, valid);
    let after = service.relations().rows().count().unwrap();
    assert_eq!(after - before, valid.len() as u64);
}

#[test]
fn create_batch_rejects_empty_and_oversized_input() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 1, 3);
    let uow = UnitOfWork::new(
        &conn,
        BatchConfig {
            max_batch_size: 2,
            ..BatchConfig::default()
        },
    );
    let service = uow.mappings::<CloPloMapping>().unwrap();

    let err = service.create_mapping_batch(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let oversized: Vec<MappingPair> = seeded
        .plos
        .iter()
        .map(|plo| MappingPair::new(seeded.clos[0], *plo))
        .collect();
    let err = service.create_mapping_batch(&oversized).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(service.relations().rows().count().unwrap(), 0);
}

#[test]
fn create_batch_with_nothing_new_inserts_nothing() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 1, 1);
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();
    service
        .create_mapping(seeded.clos[0], seeded.plos[0])
        .unwrap();

    let inserted = service
        .create_mapping_batch(&[MappingPair::new(seeded.clos[0], seeded.plos[0])])
        .unwrap();
    assert!(inserted.is_empty());
    assert_eq!(service.relations().rows().count().unwrap(), 1);
}

#[test]
fn update_batch_collision_is_reported_and_target_row_is_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 3, 2);
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();

    let target = service
        .create_mapping(seeded.clos[0], seeded.plos[0])
        .unwrap();
    service
        .create_mapping(seeded.clos[1], seeded.plos[0])
        .unwrap();
    let raw_before = raw_body(&conn, target.id());

    let colliding = MappingUpdate::new(MappingPair::new(seeded.clos[0], seeded.plos[0]))
        .with_left(seeded.clos[1]);
    let outcome = service.update_mappings_batch(&[colliding]).unwrap();

    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.failed, vec![(colliding, UpdateFailure::MappingExists)]);
    assert_eq!(raw_body(&conn, target.id()), raw_before);
}

#[test]
fn update_batch_reports_each_request_once() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 3, 3);
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();
    let (c0, c1, c2) = (seeded.clos[0], seeded.clos[1], seeded.clos[2]);
    let (p0, p1, p2) = (seeded.plos[0], seeded.plos[1], seeded.plos[2]);

    service.create_mapping(c0, p0).unwrap();
    service.create_mapping(c1, p1).unwrap();

    let move_right = MappingUpdate::new(MappingPair::new(c0, p0)).with_right(p2);
    let same_row_again = MappingUpdate::new(MappingPair::new(c0, p0)).with_left(c2);
    let absent = MappingUpdate::new(MappingPair::new(c2, p2)).with_right(p0);
    let bad_left = MappingUpdate::new(MappingPair::new(c1, p1)).with_left(EntityId::generate());
    let bad_right = MappingUpdate::new(MappingPair::new(c1, p1)).with_right(EntityId::generate());
    let claimed_target = MappingUpdate::new(MappingPair::new(c1, p1))
        .with_left(c0)
        .with_right(p2);

    let requests = [
        move_right,
        same_row_again,
        absent,
        bad_left,
        bad_right,
        claimed_target,
    ];
    let outcome = service.update_mappings_batch(&requests).unwrap();

    assert_eq!(outcome.accepted, vec![move_right]);
    assert_eq!(
        outcome.failed,
        vec![
            (same_row_again, UpdateFailure::DuplicateRequest),
            (absent, UpdateFailure::MappingNotFound),
            (bad_left, UpdateFailure::LeftNotFound),
            (bad_right, UpdateFailure::RightNotFound),
            (claimed_target, UpdateFailure::MappingExists),
        ]
    );
    assert_eq!(outcome.accepted.len() + outcome.failed.len(), requests.len());

    assert!(service.is_mapping_existed(c0, p2).unwrap());
    assert!(!service.is_mapping_existed(c0, p0).unwrap());
    assert!(service.is_mapping_existed(c1, p1).unwrap());
}

#[test]
fn update_batch_checks_collisions_against_the_state_before_the_batch() {
    let conn = open_db_in_memory().unwrap();
    let seeded = seed_outcomes(&conn, 2, 3);
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();
    let (c0, c1) = (seeded.clos[0], seeded.clos[1]);
    let (p0, p1, p2) = (seeded.plos[0], seeded.plos[1], seeded.plos[2]);

    service.create_mapping(c0, p0).unwrap();
    service.create_mapping(c1, p1).unwrap();

    // The first request frees (c0, p0); the second still sees it as held.
    let frees_pair = MappingUpdate::new(MappingPair::new(c0, p0)).with_right(p2);
    let takes_freed_pair = MappingUpdate::new(MappingPair::new(c1, p1))
        .with_left(c0)
        .with_right(p0);
    let outcome = service
        .update_mappings_batch(&[frees_pair, takes_freed_pair])
        .unwrap();

    assert_eq!(outcome.accepted, vec![frees_pair]);
    assert_eq!(
        outcome.failed,
        vec![(takes_freed_pair, UpdateFailure::MappingExists)]
    );
    assert!(service.is_mapping_existed(c1, p1).unwrap());
    assert!(!service.is_mapping_existed(c0, p0).unwrap());
}

#[test]
fn update_batch_rejects_empty_input() {
    let conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::new(&conn, BatchConfig::default());
    let service = uow.mappings::<CloPloMapping>().unwrap();

    let err = service.update_mappings_batch(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn failure_reasons_have_stable_messages() {
    assert_eq!(UpdateFailure::MappingNotFound.to_string(), "mapping does not exist");
    assert_eq!(
        UpdateFailure::MappingExists.to_string(),
        "resulting mapping already exists"
    );
}

fn raw_body(conn: &Connection, id: EntityId) -> String {
    let doc = DocumentStore::new(conn)
        .collection("clo_plo_mappings")
        .unwrap()
        .find_one(&Filter::by_id(id))
        .unwrap()
        .unwrap();
    serde_json::to_string(&doc).unwrap()
}

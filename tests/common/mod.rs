#![allow(dead_code)]

use std::sync::Arc;

use supertool::database::{Database, PersistenceMode};
use supertool::engine::{self, Engine, Row};
use supertool::filters::FilterStore;
use supertool::interface::{QueryInterface, QueryOutcome, Selection};
use supertool::query::{Query, Scope};
use supertool::record::*;
use supertool::script::{IncludePath, Runtime};
use supertool::value::Value;

pub const SWEDEN: Handle = 1;
pub const UPPSALA: Handle = 2;
pub const JOHN_BIRTH: Handle = 10;
pub const TOM_BIRTH: Handle = 11;
pub const JOHN_DEATH: Handle = 12;
pub const JOHN: Handle = 20;
pub const MARY: Handle = 21;
pub const TOM: Handle = 22;
pub const SMITH_JONES: Handle = 30;
pub const PARISH_NOTE: Handle = 40;

/// Two parents and a son: John Smith (born 1900 in Uppsala, died 1980),
/// Mary Jones (no events) and Tom Smith (born 1925, no place).
pub fn family_tree() -> Arc<Database> {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    db.insert(
        SWEDEN,
        Record::Place(Place {
            gramps_id: "P0001".into(),
            name: "Sweden".into(),
            kind: "Country".into(),
            ..Place::default()
        }),
    )
    .expect("sweden");
    db.insert(
        UPPSALA,
        Record::Place(Place {
            gramps_id: "P0002".into(),
            name: "Uppsala".into(),
            kind: "City".into(),
            enclosed_by: vec![SWEDEN],
            ..Place::default()
        }),
    )
    .expect("uppsala");
    db.insert(
        JOHN_BIRTH,
        Record::Event(Event {
            gramps_id: "E0001".into(),
            kind: "Birth".into(),
            date: Date::new(1900, 5, 1),
            place: Some(UPPSALA),
            ..Event::default()
        }),
    )
    .expect("birth");
    db.insert(
        TOM_BIRTH,
        Record::Event(Event {
            gramps_id: "E0002".into(),
            kind: "Birth".into(),
            date: Date::new(1925, 0, 0),
            ..Event::default()
        }),
    )
    .expect("birth");
    db.insert(
        JOHN_DEATH,
        Record::Event(Event {
            gramps_id: "E0003".into(),
            kind: "Death".into(),
            date: Date::new(1980, 2, 3),
            description: "Death of John".into(),
            ..Event::default()
        }),
    )
    .expect("death");
    db.insert(
        PARISH_NOTE,
        Record::Note(Note {
            gramps_id: "N0001".into(),
            text: "From the parish register".into(),
            ..Note::default()
        }),
    )
    .expect("note");
    db.insert(
        JOHN,
        Record::Person(Person {
            gramps_id: "I0001".into(),
            gender: Gender::Male,
            primary_name: Name::new("John", "Smith"),
            event_refs: vec![EventRef::primary(JOHN_BIRTH), EventRef::primary(JOHN_DEATH)],
            birth_ref_index: Some(0),
            death_ref_index: Some(1),
            families: vec![SMITH_JONES],
            notes: vec![PARISH_NOTE],
            ..Person::default()
        }),
    )
    .expect("john");
    db.insert(
        MARY,
        Record::Person(Person {
            gramps_id: "I0002".into(),
            gender: Gender::Female,
            primary_name: Name::new("Mary", "Jones"),
            families: vec![SMITH_JONES],
            ..Person::default()
        }),
    )
    .expect("mary");
    db.insert(
        TOM,
        Record::Person(Person {
            gramps_id: "I0003".into(),
            gender: Gender::Male,
            primary_name: Name::new("Tom", "Smith"),
            event_refs: vec![EventRef::primary(TOM_BIRTH)],
            birth_ref_index: Some(0),
            parent_families: vec![SMITH_JONES],
            ..Person::default()
        }),
    )
    .expect("tom");
    db.insert(
        SMITH_JONES,
        Record::Family(Family {
            gramps_id: "F0001".into(),
            father: Some(JOHN),
            mother: Some(MARY),
            children: vec![TOM],
            ..Family::default()
        }),
    )
    .expect("family");
    Arc::new(db)
}

pub fn runtime(db: &Arc<Database>) -> Runtime {
    Runtime::new(Arc::clone(db), FilterStore::default(), IncludePath::new(Vec::new()))
}

pub fn people(expressions: &str) -> Query {
    Query {
        category: "People".into(),
        expressions: expressions.into(),
        scope: Scope::All,
        ..Query::default()
    }
}

pub fn run(db: &Arc<Database>, query: &Query) -> QueryOutcome {
    QueryInterface::new(runtime(db))
        .run(query, &Selection::default())
        .expect("query ok")
}

/// Rows rendered as strings, the way they are written to CSV.
pub fn texts(rows: &[Row]) -> Vec<Vec<String>> {
    rows.iter().map(Row::to_strings).collect()
}

/// An engine over every record of the category, without a step callback.
pub fn engine(db: &Arc<Database>, category: &str, query: &Query) -> Engine {
    let info = engine::get_category_info(category).expect("category");
    let handles = info.all_handles(db).expect("handles");
    Engine::new(
        runtime(db),
        Value::None,
        info,
        handles,
        &query.initial_statements,
        &query.statements,
        &query.filter,
        &query.expressions,
        query.unwind_lists,
        query.commit_changes,
        query.summary_only,
    )
}

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use supertool::database::{Database, PersistenceMode};
use supertool::filters::FilterStore;
use supertool::interface::{QueryInterface, Selection};
use supertool::query::{Query, Scope};
use supertool::record::{Date, Event, EventRef, Gender, Name, Person, Record};
use supertool::script::{IncludePath, Runtime};

// people with a birth event each, every third one without a date
fn populate(n: u64) -> Arc<Database> {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    for i in 0..n {
        let birth = db
            .add(Record::Event(Event {
                gramps_id: format!("E{i:05}"),
                kind: "Birth".into(),
                date: if i % 3 == 0 { Date::default() } else { Date::new(1800 + (i % 200) as i32, 1, 1) },
                ..Event::default()
            }))
            .unwrap();
        db.add(Record::Person(Person {
            gramps_id: format!("I{i:05}"),
            gender: if i % 2 == 0 { Gender::Male } else { Gender::Female },
            primary_name: Name::new(&format!("Given{i}"), "Surname"),
            event_refs: vec![EventRef::primary(birth)],
            birth_ref_index: Some(0),
            ..Person::default()
        }))
        .unwrap();
    }
    Arc::new(db)
}

fn criterion_benchmark(c: &mut Criterion) {
    let db = populate(1000);
    let interface = QueryInterface::new(Runtime::new(db, FilterStore::default(), IncludePath::new(Vec::new())));
    let selection = Selection::default();

    let rows = Query {
        category: "People".into(),
        filter: "gender == 'M' and birth.date".into(),
        expressions: "name, birth.date.year, birth.place.name".into(),
        scope: Scope::All,
        ..Query::default()
    };
    c.bench_function("rows 1k people", |b| {
        b.iter(|| interface.run(black_box(&rows), &selection).unwrap())
    });

    let summary = Query {
        initial_statements: "years = []".into(),
        statements: "years.append(birth.date.year)".into(),
        expressions: "len(uniq(years)), max(years)".into(),
        summary_only: true,
        ..rows.clone()
    };
    c.bench_function("summary 1k people", |b| {
        b.iter(|| interface.run(black_box(&summary), &selection).unwrap())
    });

    let unwound = Query {
        expressions: "name, [e.type for e in events], list(range(3))".into(),
        unwind_lists: true,
        filter: String::new(),
        ..rows.clone()
    };
    c.bench_function("unwind 1k people", |b| {
        b.iter(|| interface.run(black_box(&unwound), &selection).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

mod common;

use std::time::Duration;

use common::*;
use supertool::engine::Cell;
use supertool::interface::{CancelToken, QueryInterface, QueryOptions, Selection};
use supertool::query::{Query, Scope};
use supertool::record::{Category, Record};

#[test]
fn filter_keeps_the_men() {
    let db = family_tree();
    let query = Query {
        filter: "gender == 'M'".into(),
        ..people("name")
    };
    let outcome = run(&db, &query);
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["I0001", "Smith, John", "20"], vec!["I0003", "Smith, Tom", "22"]]
    );
    assert_eq!(outcome.object_count, 2);
    assert_eq!(outcome.total_objects, 3);
    assert!(outcome.status().starts_with("Objects: 2/3; rows: 2 ("));
}

#[test]
fn tuple_fills_one_row_per_record() {
    let db = family_tree();
    let outcome = run(&db, &people("(1, 2, 3)"));
    assert_eq!(outcome.rows.len(), 3);
    assert_eq!(
        outcome.rows[0].cells(),
        &[
            Cell::Str("I0001".into()),
            Cell::Int(1),
            Cell::Int(2),
            Cell::Int(3),
            Cell::Int(20)
        ]
    );
}

#[test]
fn unwinding_fans_out_lists() {
    let db = family_tree();
    let query = Query {
        unwind_lists: true,
        ..people("name, [e.type for e in events], ['a', 'b']")
    };
    let outcome = run(&db, &query);
    // John: 1 * 2 * 2, Mary: no events, Tom: 1 * 1 * 2
    assert_eq!(outcome.rows.len(), 6);
    assert_eq!(outcome.object_count, 3);
    let john: Vec<Vec<String>> = texts(&outcome.rows)
        .into_iter()
        .filter(|r| r[0] == "I0001")
        .collect();
    assert_eq!(
        john,
        vec![
            vec!["I0001", "Smith, John", "Birth", "a", "20"],
            vec!["I0001", "Smith, John", "Death", "a", "20"],
            vec!["I0001", "Smith, John", "Birth", "b", "20"],
            vec!["I0001", "Smith, John", "Death", "b", "20"],
        ]
    );

    let flat = run(&db, &Query { unwind_lists: false, ..query });
    assert_eq!(flat.rows.len(), 3);
    assert_eq!(flat.rows[0].to_strings()[2], "['Birth', 'Death']");
}

#[test]
fn running_twice_gives_the_same_rows() {
    let db = family_tree();
    let query = Query {
        initial_statements: "seen = []".into(),
        statements: "seen.append(gramps_id)".into(),
        ..people("name, len(seen), birth.date")
    };
    let first = run(&db, &query);
    let second = run(&db, &query);
    assert_eq!(first.rows, second.rows);
    assert_eq!(texts(&first.rows)[2], vec!["I0003", "Smith, Tom", "3", "1925", "22"]);
}

#[test]
fn filtered_out_records_are_still_committed() {
    let db = family_tree();
    let query = Query {
        statements: "self.add_tag('checked')".into(),
        filter: "gender == 'F'".into(),
        commit_changes: true,
        ..people("name")
    };
    let outcome = run(&db, &query);
    assert_eq!(texts(&outcome.rows), vec![vec!["I0002", "Jones, Mary", "21"]]);
    assert_eq!(outcome.object_count, 1);
    for handle in [JOHN, MARY, TOM] {
        let record = db.get(Category::Person, handle).expect("person");
        assert_eq!(record.tags(), &["checked".to_string()]);
    }
}

#[test]
fn commit_ok_false_keeps_the_record_unchanged() {
    let db = family_tree();
    let query = Query {
        statements: "self.add_tag('x')\nif gender == 'M':\n    self.commit_ok = False".into(),
        commit_changes: true,
        ..people("commit_ok")
    };
    let outcome = run(&db, &query);
    // the flattened attribute was bound before the statements ran
    assert_eq!(outcome.rows[0].to_strings()[1], "True");
    assert!(db.get(Category::Person, JOHN).unwrap().tags().is_empty());
    assert_eq!(db.get(Category::Person, MARY).unwrap().tags(), &["x".to_string()]);
}

#[test]
fn related_records_commit_through_the_transaction() {
    let db = family_tree();
    let query = Query {
        statements: "for e in events:\n    e.description = 'seen ' + str(e.date.year)\n    commit(e)".into(),
        commit_changes: true,
        ..people("")
    };
    let outcome = run(&db, &query);
    assert!(outcome.rows.is_empty());
    match db.get(Category::Event, JOHN_BIRTH).unwrap() {
        Record::Event(e) => assert_eq!(e.description, "seen 1900"),
        other => panic!("unexpected record {other:?}"),
    }
}

#[test]
fn failing_run_rolls_back_its_commits() {
    let db = family_tree();
    let query = Query {
        statements: "self.add_tag('t')".into(),
        commit_changes: true,
        ..people("1 // (handle - 21)")
    };
    let error = QueryInterface::new(runtime(&db))
        .run(&query, &Selection::default())
        .unwrap_err();
    assert!(error.to_string().starts_with("ZeroDivisionError"), "{error}");
    assert!(db.get(Category::Person, JOHN).unwrap().tags().is_empty());
    assert!(db.get(Category::Person, MARY).unwrap().tags().is_empty());
}

#[test]
fn commit_mode_needs_a_transaction() {
    let db = family_tree();
    let query = Query {
        commit_changes: true,
        ..people("name")
    };
    let mut engine = engine(&db, "People", &query);
    let error = engine.get_values(None).err().expect("no transaction");
    assert_eq!(error.to_string(), "Need a transaction (check 'Commit changes')");

    let error = QueryInterface::new(runtime(&db))
        .run(&people("DummyTxn(trans)"), &Selection::default())
        .unwrap_err();
    assert_eq!(error.to_string(), "Need a transaction (check 'Commit changes')");
}

#[test]
fn summary_evaluates_once_over_the_initial_context() {
    let db = family_tree();
    let query = Query {
        initial_statements: "names = []".into(),
        statements: "names.append(name)".into(),
        filter: "gender == 'M'".into(),
        summary_only: true,
        ..people("len(names), '; '.join(sorted(names))")
    };
    let outcome = run(&db, &query);
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["", "3", "Jones, Mary; Smith, John; Smith, Tom", ""]]
    );
    assert_eq!(outcome.rows[0].cells()[0], Cell::Empty);
    assert_eq!(outcome.object_count, 2);
}

#[test]
fn no_category_runs_only_the_summary() {
    let db = family_tree();
    let query = Query {
        initial_statements: "x = 20".into(),
        summary_only: true,
        expressions: "x + 1, db.person('I0002').name".into(),
        ..Query::default()
    };
    let outcome = run(&db, &query);
    assert_eq!(texts(&outcome.rows), vec![vec!["", "21", "Jones, Mary", ""]]);
    assert_eq!(outcome.total_objects, 0);
}

#[test]
fn cancellation_keeps_earlier_rows() {
    let db = family_tree();
    let query = Query {
        summary_only: false,
        ..people("name")
    };
    let mut calls = 0;
    let mut engine = engine(&db, "People", &query).with_step(move || {
        calls += 1;
        calls > 2
    });
    let rows: Vec<_> = engine
        .get_values(None)
        .expect("rows")
        .collect::<Result<Vec<_>, _>>()
        .expect("no error");
    assert_eq!(
        texts(&rows),
        vec![vec!["I0001", "Smith, John", "20"], vec!["I0002", "Jones, Mary", "21"]]
    );
    assert_eq!(engine.object_count(), 2);
    assert_eq!(engine.total_objects(), 3);
}

#[test]
fn cancelled_token_stops_before_the_first_record() {
    let db = family_tree();
    let token = CancelToken::new();
    token.cancel();
    let outcome = QueryInterface::new(runtime(&db))
        .run_with(&people("name"), &Selection::default(), &QueryOptions::default(), &token)
        .expect("cancelled run");
    assert!(outcome.rows.is_empty());
    assert!(outcome.cancelled);
    assert_eq!(outcome.total_objects, 3);
}

#[test]
fn row_limit_stops_pulling() {
    let db = family_tree();
    let options = QueryOptions {
        stream_results: false,
        timeout: None,
        row_limit: 2,
    };
    let outcome = QueryInterface::new(runtime(&db))
        .run_with(&people("name"), &Selection::default(), &options, &CancelToken::new())
        .expect("limited run");
    assert_eq!(outcome.rows.len(), 2);
    assert!(outcome.limited);
    // the third record was never processed
    assert_eq!(outcome.object_count, 2);
}

#[test]
fn background_query_streams_rows() {
    let db = family_tree();
    let interface = QueryInterface::new(runtime(&db));
    let options = QueryOptions {
        timeout: Some(Duration::from_secs(60)),
        ..QueryOptions::default()
    };
    let mut handle = interface
        .start_query(people("gender"), Selection::default(), options)
        .expect("started");
    let receiver = handle.results.take().expect("streaming");
    let genders: Vec<String> = receiver.iter().map(|row| row.to_strings()[1].clone()).collect();
    let outcome = handle.join().expect("finished");
    assert_eq!(genders, vec!["M", "F", "M"]);
    assert_eq!(outcome.row_count, 3);
    assert!(outcome.rows.is_empty());
}

#[test]
fn selected_scope_uses_the_selection() {
    let db = family_tree();
    let query = Query {
        scope: Scope::Selected,
        ..people("name, len(uistate['selected']), uistate['category']")
    };
    let selection = Selection {
        selected: vec![TOM],
        filtered: vec![JOHN, MARY],
    };
    let outcome = QueryInterface::new(runtime(&db))
        .run(&query, &selection)
        .expect("run");
    assert_eq!(texts(&outcome.rows), vec![vec!["I0003", "Smith, Tom", "1", "People", "22"]]);
    assert_eq!(outcome.total_objects, 1);

    let filtered = QueryInterface::new(runtime(&db))
        .run(&Query { scope: Scope::Filtered, ..query }, &selection)
        .expect("run");
    assert_eq!(filtered.total_objects, 2);
}

#[test]
fn vanished_handle_is_an_error() {
    let db = family_tree();
    let selection = Selection {
        selected: vec![JOHN, 999],
        filtered: Vec::new(),
    };
    let query = Query {
        scope: Scope::Selected,
        ..people("name")
    };
    let error = QueryInterface::new(runtime(&db))
        .run(&query, &selection)
        .unwrap_err();
    assert_eq!(error.to_string(), "Person record with handle 999 not found");
}

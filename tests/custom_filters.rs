mod common;

use std::sync::Arc;

use common::*;
use supertool::filters::{FilterDatabase, FilterStore};
use supertool::interface::{QueryInterface, Selection};
use supertool::query::Query;
use supertool::script::{IncludePath, Runtime};

fn interface_with_filters(path: &std::path::Path) -> QueryInterface {
    let db = family_tree();
    QueryInterface::new(Runtime::new(
        Arc::clone(&db),
        FilterStore::new(Some(path.to_path_buf())),
        IncludePath::new(Vec::new()),
    ))
}

#[test]
fn saved_filter_is_callable_from_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom_filters.json");
    let interface = interface_with_filters(&path);

    let men = Query {
        title: "Men".into(),
        statements: "g = gender".into(),
        filter: "g == 'M'".into(),
        ..people("name")
    };
    let saved = interface.save_as_filter(&men).expect("saved");
    assert_eq!(saved.namespace, "Person");
    assert_eq!(saved.expression, "g == 'M'");

    let stored = FilterDatabase::load(&path).expect("reloaded");
    assert_eq!(stored.names("Person"), vec!["Men"]);

    let query = Query {
        filter: "filter('Men')(self)".into(),
        ..people("name")
    };
    let outcome = interface.run(&query, &Selection::default()).expect("run");
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["I0001", "Smith, John", "20"], vec!["I0003", "Smith, Tom", "22"]]
    );

    // a filter for people is not visible from families
    let families = Query {
        category: "Families".into(),
        ..query
    };
    let error = interface.run(&families, &Selection::default()).unwrap_err();
    assert_eq!(error.to_string(), "Unknown filter 'Men' for Family");
}

#[test]
fn save_as_filter_checks_its_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filters.json");
    let interface = interface_with_filters(&path);

    let untitled = Query {
        filter: "True".into(),
        ..people("")
    };
    assert_eq!(
        interface.save_as_filter(&untitled).unwrap_err().to_string(),
        "Please supply a title/name"
    );

    let empty = Query {
        title: "Everyone".into(),
        ..people("")
    };
    assert_eq!(
        interface.save_as_filter(&empty).unwrap_err().to_string(),
        "Please supply a filtering condition"
    );

    let everyone = Query {
        filter: "True".into(),
        ..empty
    };
    interface.save_as_filter(&everyone).expect("first save");
    assert_eq!(
        interface.save_as_filter(&everyone).unwrap_err().to_string(),
        "Filter 'Everyone' already exists; choose another name"
    );
}

#[test]
fn unknown_filter_names_the_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let interface = interface_with_filters(&dir.path().join("none.json"));
    let query = Query {
        filter: "filter('Nobody')(self)".into(),
        ..people("name")
    };
    let error = interface.run(&query, &Selection::default()).unwrap_err();
    assert_eq!(error.to_string(), "Unknown filter 'Nobody' for Person");
}

#[test]
fn filters_may_recurse_over_other_records_but_not_loop() {
    let dir = tempfile::tempdir().unwrap();
    let interface = interface_with_filters(&dir.path().join("filters.json"));

    let descends = Query {
        title: "Descends".into(),
        filter: "handle == 20 or any([filter('Descends')(f.father) for f in parent_families])".into(),
        ..people("name")
    };
    interface.save_as_filter(&descends).expect("saved");
    let query = Query {
        filter: "filter('Descends')(self)".into(),
        ..people("name")
    };
    let outcome = interface.run(&query, &Selection::default()).expect("run");
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["I0001", "Smith, John", "20"], vec!["I0003", "Smith, Tom", "22"]]
    );

    let looping = Query {
        title: "Loop".into(),
        filter: "filter('Loop')(self)".into(),
        ..people("name")
    };
    interface.save_as_filter(&looping).expect("saved");
    let query = Query {
        filter: "filter('Loop')(self)".into(),
        ..people("name")
    };
    let error = interface.run(&query, &Selection::default()).unwrap_err();
    assert_eq!(error.to_string(), "RecursionError: maximum recursion depth exceeded");
}

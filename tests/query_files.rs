use std::fs;

use supertool::query::{Query, Scope, ScriptFile};

fn sample() -> Query {
    Query {
        title: "Ages".into(),
        category: "People".into(),
        initial_statements: "ages = []".into(),
        statements: "age = death.date - birth.date\nif age:\n    ages.append(age)\n".into(),
        filter: "birth.date and death.date".into(),
        expressions: "name, age".into(),
        scope: Scope::Filtered,
        unwind_lists: true,
        commit_changes: false,
        summary_only: false,
    }
}

#[test]
fn block_format_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ages.script");
    ScriptFile::save(&path, &sample()).unwrap();
    let first = fs::read_to_string(&path).unwrap();
    assert!(first.starts_with("[title]\nAges\n\n[category]\nPeople\n\n"));
    assert!(first.contains("[unwind_lists]\nTrue\n\n[commit_changes]\nFalse\n"));

    let loaded = ScriptFile::load(&path, true).unwrap();
    assert_eq!(loaded.statements, "age = death.date - birth.date\nif age:\n    ages.append(age)");
    assert_eq!(loaded.scope, Scope::Filtered);
    ScriptFile::save(&path, &loaded).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn json_format_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ages.json");
    ScriptFile::save(&path, &sample()).unwrap();
    let first = fs::read_to_string(&path).unwrap();
    let object: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(object["unwind_lists"], "True");
    assert_eq!(object["scope"], "filtered");

    let loaded = ScriptFile::load(&path, false).unwrap();
    ScriptFile::save(&path, &loaded).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn empty_values_have_no_blank_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bare.script");
    ScriptFile::save(&path, &Query::default()).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("[title]\n[category]\n[initial_statements]\n"));
    assert!(text.ends_with("[summary_only]\nFalse\n\n"));
}

#[test]
fn missing_file_loads_defaults_named_after_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let query = ScriptFile::load(&dir.path().join("Unsaved query.script"), true).unwrap();
    assert_eq!(query.title, "Unsaved query");
    assert_eq!(query.scope, Scope::Selected);
    assert!(!query.unwind_lists);
}

#[test]
fn non_ascii_text_survives_both_formats() {
    let dir = tempfile::tempdir().unwrap();
    let query = Query {
        title: "Åsa och 名前".into(),
        statements: "namn = 'Åsa'\nortnamn = \"Göteborg – 北京\"".into(),
        expressions: "namn, ortnamn".into(),
        ..sample()
    };
    for file in ["unicode.script", "unicode.json"] {
        let path = dir.path().join(file);
        ScriptFile::save(&path, &query).unwrap();
        let loaded = ScriptFile::load(&path, true).unwrap();
        assert_eq!(loaded.title, "Åsa och 名前");
        assert_eq!(loaded.statements, query.statements);
        assert_eq!(loaded.expressions, "namn, ortnamn");
    }
}

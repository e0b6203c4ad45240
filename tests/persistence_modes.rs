use supertool::database::{Database, ImportedRecord, PersistenceMode};
use supertool::record::{Category, Note, Record};

fn note(text: &str) -> Record {
    Record::Note(Note {
        gramps_id: "N0001".into(),
        text: text.into(),
        ..Note::default()
    })
}

#[test]
fn in_memory_mode_allows_basic_operations() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let handle = db.add(note("first")).expect("added");
    assert_eq!(db.handles(Category::Note).unwrap(), vec![handle]);
    assert_eq!(db.handle_for(Category::Note, "N0001").unwrap(), Some(handle));
    assert!(db.get(Category::Person, handle).is_err());
}

#[test]
fn finished_transactions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("genealogy.db").display().to_string();
    let handle = {
        let db = Database::new(PersistenceMode::File(path.clone())).expect("db");
        let handle = db.add(note("draft")).expect("added");
        let mut kept = db.begin("Keep");
        db.commit(&mut kept, handle, note("final")).expect("commit");
        assert_eq!(db.finish(&mut kept).expect("finish"), 1);

        let mut dropped = db.begin("Drop");
        db.commit(&mut dropped, handle, note("discarded")).expect("commit");
        db.abort(&mut dropped).expect("abort");
        handle
    };
    let db = Database::new(PersistenceMode::File(path)).expect("restored");
    assert_eq!(db.get(Category::Note, handle).unwrap(), note("final"));
    // restored handles are never generated again
    assert!(db.add(note("another")).unwrap() > handle);
}

#[test]
fn closed_transactions_refuse_commits() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let handle = db.add(note("x")).unwrap();
    let mut transaction = db.begin("Once");
    db.finish(&mut transaction).unwrap();
    assert!(transaction.is_closed());
    let error = db.commit(&mut transaction, handle, note("y")).unwrap_err();
    assert_eq!(error.to_string(), "Transaction 'Once' is already closed");
}

#[test]
fn import_keeps_explicit_handles() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let entries = vec![ImportedRecord {
        handle: 7,
        record: note("imported"),
    }];
    let count = db.import(&serde_json::to_string(&entries).unwrap()).unwrap();
    assert_eq!(count, 1);
    assert_eq!(db.get(Category::Note, 7).unwrap(), note("imported"));
    assert_eq!(db.add(note("next")).unwrap(), 8);
}

#[test]
fn refused_writes_roll_the_transaction_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("genealogy.db");
    let db = Database::new(PersistenceMode::File(path.display().to_string())).expect("db");
    let handle = db.add(note("original")).expect("added");

    let other = rusqlite::Connection::open(&path).unwrap();
    other
        .execute_batch(
            "create trigger refuse_updates before update on Record
             begin select raise(abort, 'read only'); end;",
        )
        .unwrap();

    let mut transaction = db.begin("Edit");
    db.commit(&mut transaction, handle, note("edited")).expect("commit");
    assert!(db.finish(&mut transaction).is_err());
    assert!(transaction.is_closed());
    assert_eq!(db.get(Category::Note, handle).unwrap(), note("original"));
}

#[test]
fn repeated_commits_count_once() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let handle = db.add(note("x")).unwrap();
    let mut transaction = db.begin("Twice");
    db.commit(&mut transaction, handle, note("y")).unwrap();
    db.commit(&mut transaction, handle, note("z")).unwrap();
    assert_eq!(transaction.len(), 1);
    assert_eq!(db.finish(&mut transaction).unwrap(), 1);
}

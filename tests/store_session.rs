//! Recording targets through an edit session and reading them back.

use confpatch::{
    EditSession, ItemStatus, JsonTemplateStore, PatchService, StoreError, TemplateStore,
};
use std::collections::HashMap;
use std::fs;

#[test]
fn record_save_apply_inspect() {
    let dir = tempfile::tempdir().unwrap();
    let files = dir.path().join("files");
    fs::create_dir(&files).unwrap();
    fs::write(files.join("a.properties"), "db.port=5432\ndb.host=localhost\n").unwrap();
    fs::write(files.join("b.yaml"), "database:\n  port: 5432 # pg\n").unwrap();

    let store = JsonTemplateStore::open(dir.path().join("templates")).unwrap();
    let service = PatchService::new(&files);

    let mut session = EditSession::create("database", &files);
    session.set_description("connection settings");
    let port = session.add_item("port", "listening port", "5432");

    let hit = service
        .search_anchor("a.properties", "db.port=", "")
        .unwrap()
        .next()
        .unwrap();
    session
        .add_target_from_match(&port, "a.properties", &hit, "db.port=", "")
        .unwrap()
        .unwrap();

    let hit = service
        .search_anchor("b.yaml", "port: ", " #")
        .unwrap()
        .next()
        .unwrap();
    assert_eq!(hit.line_number, 2);
    session
        .add_target_from_match(&port, "b.yaml", &hit, "port: ", " #")
        .unwrap()
        .unwrap();

    let saved = session.save(&store).unwrap();
    assert!(!saved.id.is_empty());
    assert!(saved.items[0].targets.iter().all(|t| !t.id.is_empty()));

    let loaded = store.get_template(&saved.id).unwrap();
    assert_eq!(loaded, saved);

    let status = service.inspect_template(&loaded);
    assert_eq!(status.items[0].status, ItemStatus::Ok);
    assert_eq!(status.items[0].current_value.as_deref(), Some("5432"));

    let values = HashMap::from([(port.clone(), "6543".to_string())]);
    let summary = service.apply_template_values(&loaded, &values);
    assert_eq!(summary.applied_count, 2);
    assert_eq!(
        fs::read_to_string(files.join("b.yaml")).unwrap(),
        "database:\n  port: 6543 # pg\n"
    );

    let status = service.inspect_template(&loaded);
    assert_eq!(status.items[0].current_value.as_deref(), Some("6543"));
}

#[test]
fn reopen_edit_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonTemplateStore::open(dir.path()).unwrap();

    let mut session = EditSession::create("first", dir.path());
    session.add_item("a", "", "");
    let saved = session.save(&store).unwrap();

    let mut session = EditSession::open(&store, &saved.id, dir.path()).unwrap();
    session.add_item("b", "", "");
    session.cancel();
    assert_eq!(store.get_template(&saved.id).unwrap().items.len(), 1);

    let mut session = EditSession::open(&store, &saved.id, dir.path()).unwrap();
    session.add_item("b", "", "");
    session.save(&store).unwrap();

    let list = store.list_templates().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].item_count, 2);

    store.delete_template(&saved.id).unwrap();
    assert!(matches!(
        store.get_template(&saved.id),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn list_is_sorted_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonTemplateStore::open(dir.path()).unwrap();
    for name in ["zeta", "alpha", "mid"] {
        EditSession::create(name, dir.path()).save(&store).unwrap();
    }

    let names: Vec<String> = store
        .list_templates()
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, ["alpha", "mid", "zeta"]);
}

#[test]
fn saving_without_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonTemplateStore::open(dir.path()).unwrap();

    let mut session = EditSession::create("", dir.path());
    session.add_item("", "", "");
    let err = session.save(&store).unwrap_err();

    match err {
        StoreError::Validation(e) => assert_eq!(e.issues.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

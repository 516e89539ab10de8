//! Checkpoints must survive reopening the store, as they do across runs.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use filerelay_state::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use filerelay_types::{ItemKey, StageId};

fn keys() -> HashSet<ItemKey> {
    let now: DateTime<Utc> = Utc::now();
    (0..20)
        .map(|i| ItemKey {
            path: PathBuf::from(format!("/data/in/file-{i:02}.csv")),
            size: i * 100,
            mtime: now,
        })
        .collect()
}

fn assert_survives_reopen<S: CheckpointStore>(open: impl Fn() -> S) {
    let id = StageId::new("inbox", "backup");
    let expected = keys();
    open().save(&id, &expected).unwrap();
    assert_eq!(open().load(&id).unwrap(), expected);
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    assert_survives_reopen(|| FileCheckpointStore::open(dir.path()).unwrap());
}

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");
    assert_survives_reopen(|| SqliteCheckpointStore::open(&db).unwrap());
}

#[test]
fn stores_are_usable_as_trait_objects() {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<Box<dyn CheckpointStore>> = vec![
        Box::new(FileCheckpointStore::open(dir.path()).unwrap()),
        Box::new(SqliteCheckpointStore::in_memory().unwrap()),
    ];
    let id = StageId::new("p", "s");
    for store in &stores {
        store.save(&id, &keys()).unwrap();
        assert_eq!(store.load(&id).unwrap().len(), 20, "{}", store.location());
    }
}

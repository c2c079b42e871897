use chrono::{Duration, Utc};
use quire_store::{LocalStore, RenameOperation};
use tempfile::TempDir;

#[test]
fn test_folder_move_then_nested_rename_replays_in_order() {
    let mut store = LocalStore::new();
    let work = store.create_folder("Work", None).unwrap();
    let archive = store.create_folder("Archive", None).unwrap();
    let note = store.create_note("Plan", Some(work.clone())).unwrap();

    store.move_folder(&work, Some(archive)).unwrap();
    store.rename_note(&note, "Roadmap").unwrap();

    assert_eq!(
        store.renames().to_vec(),
        vec![
            RenameOperation::new("Work", "Archive/Work"),
            RenameOperation::new("Archive/Work/Plan.md", "Archive/Work/Roadmap.md"),
        ]
    );
    assert_eq!(store.note_path(&note).unwrap(), "Archive/Work/Roadmap.md");
}

#[test]
fn test_sanitized_titles_drive_paths() {
    let mut store = LocalStore::new();
    let folder = store.create_folder("a/b", None).unwrap();
    let note = store.create_note("what?", Some(folder)).unwrap();

    assert_eq!(store.note_path(&note).unwrap(), "a_b/what_.md");

    // A rename that resolves to the same sanitized path queues nothing.
    store.rename_note(&note, "what*").unwrap();
    assert!(store.renames().is_empty());
}

#[test]
fn test_trash_lifecycle_survives_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let now = Utc::now();

    let mut store = LocalStore::new();
    let work = store.create_folder("Work", None).unwrap();
    let kept = store.create_note("Kept", None).unwrap();
    store.create_note("Gone", Some(work.clone())).unwrap();
    store
        .soft_delete_folder_at(&work, now - Duration::days(45))
        .unwrap();
    store.save(&path).unwrap();

    let mut reloaded = LocalStore::load(&path).unwrap();
    let (notes, folders) = reloaded.trashed();
    assert_eq!((notes.len(), folders.len()), (1, 1));

    let report = reloaded.reap_expired(now, Duration::days(30));
    assert_eq!(report.paths, vec!["Work"]);
    reloaded.save(&path).unwrap();

    let after = LocalStore::load(&path).unwrap();
    assert_eq!(after.notes().len(), 1);
    assert!(after.note(&kept).is_some());
    assert_eq!(after.deleted_paths().to_vec(), vec!["Work"]);
}

#[test]
fn test_snapshot_round_with_concurrent_edits() {
    let mut store = LocalStore::new();
    let a = store.create_note("A", None).unwrap();
    store.rename_note(&a, "A2").unwrap();
    let snapshot = store.snapshot();

    let b = store.create_note("B", None).unwrap();
    store.rename_note(&b, "B2").unwrap();

    let mut synced = snapshot.notes.clone();
    for note in &mut synced {
        note.synced_at = Some(Utc::now());
    }
    store.commit_sync(&snapshot, synced, snapshot.folders.clone());

    assert_eq!(
        store.renames().to_vec(),
        vec![RenameOperation::new("B.md", "B2.md")]
    );
    assert!(!store.unsynced().contains(&a));
    assert!(store.unsynced().contains(&b));
}

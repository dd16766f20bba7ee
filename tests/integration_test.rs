use nk::{MemoryRepo, Repo, Repository};
use std::fs;
use tempfile::tempdir;

#[test]
fn snapshot_and_restore_round_trip_a_tree() {
    let repo_dir = tempdir().unwrap();
    let work_dir = tempdir().unwrap();

    fs::write(work_dir.path().join("a.txt"), b"hello world").unwrap();
    fs::create_dir(work_dir.path().join("sub")).unwrap();
    fs::write(work_dir.path().join("sub/b.txt"), vec![42u8; 50_000]).unwrap();

    let mut repo = Repo::open(repo_dir.path()).unwrap();
    let changed = nk::snapshot(&mut repo, work_dir.path(), 1_700_000_000).unwrap();
    assert!(changed);
    repo.close().unwrap();

    // Mutate the tree after the snapshot.
    fs::write(work_dir.path().join("a.txt"), b"goodbye world").unwrap();
    fs::remove_file(work_dir.path().join("sub/b.txt")).unwrap();
    fs::write(work_dir.path().join("new.txt"), b"not part of the snapshot").unwrap();

    let mut repo = Repo::open(repo_dir.path()).unwrap();
    nk::restore(&mut repo, work_dir.path(), 1_700_000_000).unwrap();

    assert_eq!(fs::read(work_dir.path().join("a.txt")).unwrap(), b"hello world");
    assert_eq!(fs::read(work_dir.path().join("sub/b.txt")).unwrap(), vec![42u8; 50_000]);
    assert!(!work_dir.path().join("new.txt").exists());

    repo.close().unwrap();
}

#[test]
fn reopening_a_repository_rebuilds_the_weak_filter() {
    let repo_dir = tempdir().unwrap();
    let work_dir = tempdir().unwrap();
    fs::write(work_dir.path().join("big.bin"), vec![9u8; 200_000]).unwrap();

    {
        let mut repo = Repo::open(repo_dir.path()).unwrap();
        nk::snapshot(&mut repo, work_dir.path(), 1).unwrap();
        repo.close().unwrap();
    }

    let mut repo = Repo::open(repo_dir.path()).unwrap();
    let (weak, strong) = {
        let data = fs::read(work_dir.path().join("big.bin")).unwrap();
        let window = &data[0..8 * 1024];
        let (weak, _, _) = nk::weak_hash(window);
        (weak, nk::strong_hash(window))
    };
    assert!(repo.has_weak(weak));
    assert!(repo.read_block(&strong).unwrap().is_some());
    repo.close().unwrap();
}

#[test]
fn status_lists_changes_without_writing_a_snapshot() {
    let repo_dir = tempdir().unwrap();
    let work_dir = tempdir().unwrap();
    fs::write(work_dir.path().join("a.txt"), b"v1").unwrap();

    let mut repo = Repo::open(repo_dir.path()).unwrap();
    let changes = nk::status(&mut repo, work_dir.path()).unwrap();
    assert_eq!(changes.len(), 1);
    assert!(repo.list_states().unwrap().is_empty());
    repo.close().unwrap();
}

#[test]
fn status_and_restore_never_persist_a_signature() {
    let work_dir = tempdir().unwrap();
    fs::write(work_dir.path().join("a.txt"), b"hello world").unwrap();

    let mut repo = MemoryRepo::new();
    assert!(nk::snapshot(&mut repo, work_dir.path(), 1_000).unwrap());
    let signatures_after_snapshot = repo.signature_count();

    // Local edit that was never snapshotted.
    fs::write(work_dir.path().join("a.txt"), b"goodbye world").unwrap();

    let changes = nk::status(&mut repo, work_dir.path()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        repo.signature_count(),
        signatures_after_snapshot,
        "status() must not persist a signature for unsnapshotted content"
    );

    nk::restore(&mut repo, work_dir.path(), 1_000).unwrap();
    assert_eq!(fs::read(work_dir.path().join("a.txt")).unwrap(), b"hello world");
    assert_eq!(
        repo.signature_count(),
        signatures_after_snapshot,
        "restore() must not persist a signature for the overwritten content"
    );
}

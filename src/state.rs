//! Directory state: per-file content identity, change detection against
//! the previous snapshot, and the snapshot/restore/status operations built
//! on top of it.
//!
//! Ported from the directory-walk and checksum logic of the system this
//! design replaces: a walk visits every file in lexicographic order,
//! skipping dotfiles and dot-directories (which is how a repository's own
//! metadata directory, conventionally dot-prefixed, stays out of its own
//! snapshots without special-casing it). A file whose mtime hasn't moved
//! since the previous scan is trusted without re-chunking; only a changed
//! mtime pays for a fresh content hash, and even then a hash match still
//! counts as unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::{Deserialize, Serialize};

use crate::chunker;
use crate::error::RepoError;
use crate::hashing::StrongHash;
use crate::repo::{Repository, TIMESTAMP_MAX};
use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Unchanged,
    New,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileState {
    pub mtime: i64,
    pub sgn_sum: StrongHash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirState {
    pub timestamp: i64,
    pub files: BTreeMap<String, FileState>,
}

impl DirState {
    /// Strong hash over every `(relpath, sgn_sum)` pair in lexicographic
    /// relpath order. Two directory states with identical file content at
    /// identical paths checksum identically regardless of scan order.
    pub fn checksum(&self) -> StrongHash {
        let mut hasher = blake3::Hasher::new();
        for (relpath, fs) in &self.files {
            hasher.update(relpath.as_bytes());
            hasher.update(&fs.sgn_sum);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; crate::hashing::STRONG_HASH_SIZE];
        out.copy_from_slice(&digest.as_bytes()[..crate::hashing::STRONG_HASH_SIZE]);
        out
    }
}

#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub status: Status,
    pub mtime: i64,
    pub sgn_sum: StrongHash,
    /// The freshly-built signature for a New or Changed file, held only for
    /// the duration of the scan (per §3's FileState note). `snapshot()` is
    /// the sole caller that persists it; `status()`/`restore()` read the
    /// diff without ever writing a signature.
    pub sig: Option<Signature>,
}

#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub timestamp: i64,
    pub entries: BTreeMap<String, DiffEntry>,
}

fn is_hidden(name: &str) -> bool {
    name != "." && name.starts_with('.')
}

/// Walks `root` in lexicographic relpath order, skipping dotfiles and
/// dot-directories, returning `(relpath, absolute path, mtime)` triples.
fn walk_sorted(root: &Path) -> std::io::Result<Vec<(String, PathBuf, i64)>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relpath = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let meta = entry.metadata()?;
        let mtime = FileTime::from_last_modification_time(&meta).seconds();
        out.push((relpath, entry.path().to_path_buf(), mtime));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Scans `root`, comparing every file against `prev`, and returns a diff
/// stamped with `timestamp`. New and Changed files are chunked and their
/// freshly-built signature is held transiently on the diff entry, but never
/// written to `repo` here — only `snapshot()` persists a signature, so that
/// a read-only `status()` or an in-progress `restore()` never mutates the
/// signature store for content that was never snapshotted. Unchanged files
/// are trusted by mtime without re-chunking; files present in `prev` but
/// absent from the walk are copied across with status `Deleted`.
pub fn scan(
    root: &Path,
    repo: &mut impl Repository,
    prev: &DirState,
    timestamp: i64,
) -> Result<Diff, RepoError> {
    let mut diff = Diff {
        timestamp,
        entries: BTreeMap::new(),
    };

    let mut seen = std::collections::HashSet::new();

    for (relpath, abspath, mtime) in walk_sorted(root)? {
        seen.insert(relpath.clone());
        let entry = match prev.files.get(&relpath) {
            None => {
                let sig = chunker::build_signature_for_file(&abspath, repo)?;
                let sgn_sum = sig.checksum();
                DiffEntry {
                    status: Status::New,
                    mtime,
                    sgn_sum,
                    sig: Some(sig),
                }
            }
            Some(fs) if fs.mtime == mtime => DiffEntry {
                status: Status::Unchanged,
                mtime,
                sgn_sum: fs.sgn_sum,
                sig: None,
            },
            Some(fs) => {
                let sig = chunker::build_signature_for_file(&abspath, repo)?;
                let sgn_sum = sig.checksum();
                if sgn_sum == fs.sgn_sum {
                    DiffEntry {
                        status: Status::Unchanged,
                        mtime,
                        sgn_sum,
                        sig: None,
                    }
                } else {
                    DiffEntry {
                        status: Status::Changed,
                        mtime,
                        sgn_sum,
                        sig: Some(sig),
                    }
                }
            }
        };
        diff.entries.insert(relpath, entry);
    }

    for (relpath, fs) in &prev.files {
        if !seen.contains(relpath) {
            diff.entries.insert(
                relpath.clone(),
                DiffEntry {
                    status: Status::Deleted,
                    mtime: fs.mtime,
                    sgn_sum: fs.sgn_sum,
                    sig: None,
                },
            );
        }
    }

    Ok(diff)
}

/// Projects a diff down to the persistable `DirState`: Deleted entries are
/// dropped since they no longer exist on disk.
pub fn to_dir_state(diff: &Diff) -> DirState {
    let files = diff
        .entries
        .iter()
        .filter(|(_, e)| e.status != Status::Deleted)
        .map(|(relpath, e)| {
            (
                relpath.clone(),
                FileState {
                    mtime: e.mtime,
                    sgn_sum: e.sgn_sum,
                },
            )
        })
        .collect();
    DirState {
        timestamp: diff.timestamp,
        files,
    }
}

/// Scans `root`, stores any changed content, and if anything moved,
/// persists a new directory state stamped `timestamp`. Returns `true` if a
/// new state was written.
pub fn snapshot(repo: &mut impl Repository, root: &Path, timestamp: i64) -> Result<bool, RepoError> {
    let prev = repo.read_state(TIMESTAMP_MAX)?.unwrap_or_default();
    let diff = scan(root, repo, &prev, timestamp)?;
    let any_changed = diff.entries.values().any(|e| e.status != Status::Unchanged);
    if any_changed {
        for entry in diff.entries.values() {
            if let Some(sig) = &entry.sig {
                repo.write_signature(entry.sgn_sum, sig)?;
            }
        }
        let new_state = to_dir_state(&diff);
        tracing::info!(timestamp, files = new_state.files.len(), "snapshot written");
        repo.write_state(&new_state)?;
    } else {
        tracing::info!("nothing changed since last snapshot");
    }
    Ok(any_changed)
}

/// Restores `root` to the state recorded at `timestamp`: files that exist
/// now but didn't back then are deleted, files that differ or are missing
/// are recreated from their stored signature with the recorded mtime
/// reapplied, and files already matching are left untouched.
pub fn restore(repo: &mut impl Repository, root: &Path, timestamp: i64) -> Result<(), RepoError> {
    let target = repo.read_state(timestamp)?.ok_or(RepoError::NoSnapshot)?;
    let diff = scan(root, repo, &target, 0)?;
    tracing::info!(timestamp, root = %root.display(), "restoring snapshot");

    for (relpath, entry) in &diff.entries {
        let abspath = root.join(relpath);
        match entry.status {
            Status::New => {
                std::fs::remove_file(&abspath)?;
            }
            Status::Changed | Status::Deleted => {
                let target_fs = &target.files[relpath];
                let sig = repo
                    .read_signature(&target_fs.sgn_sum)?
                    .ok_or_else(|| RepoError::MissingBlock {
                        strong: crate::hashing::hex_string(&target_fs.sgn_sum),
                    })?;
                if let Some(parent) = abspath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                chunker::restore_to_file(&sig, repo, &abspath)?;
                let ft = FileTime::from_unix_time(target_fs.mtime, 0);
                filetime::set_file_mtime(&abspath, ft)?;
            }
            Status::Unchanged => {}
        }
    }
    Ok(())
}

/// Read-only variant of [`scan`] against the latest state: reports every
/// relpath whose status isn't Unchanged, without writing anything.
pub fn status(repo: &mut impl Repository, root: &Path) -> Result<Vec<(String, Status)>, RepoError> {
    let prev = repo.read_state(TIMESTAMP_MAX)?.unwrap_or_default();
    let diff = scan(root, repo, &prev, 0)?;
    Ok(diff
        .entries
        .into_iter()
        .filter(|(_, e)| e.status != Status::Unchanged)
        .map(|(relpath, e)| (relpath, e.status))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepo;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn checksum_is_independent_of_scan_order() {
        let mut a = DirState {
            timestamp: 1,
            files: BTreeMap::new(),
        };
        a.files.insert(
            "b.txt".into(),
            FileState {
                mtime: 0,
                sgn_sum: [1u8; 16],
            },
        );
        a.files.insert(
            "a.txt".into(),
            FileState {
                mtime: 0,
                sgn_sum: [2u8; 16],
            },
        );

        let mut b = DirState {
            timestamp: 2,
            files: BTreeMap::new(),
        };
        b.files.insert(
            "a.txt".into(),
            FileState {
                mtime: 0,
                sgn_sum: [2u8; 16],
            },
        );
        b.files.insert(
            "b.txt".into(),
            FileState {
                mtime: 0,
                sgn_sum: [1u8; 16],
            },
        );

        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn snapshot_then_status_reports_no_changes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join(".hidden"), b"nope").unwrap();

        let mut repo = MemoryRepo::new();
        let changed = snapshot(&mut repo, dir.path(), 1000).unwrap();
        assert!(changed);

        let changes = status(&mut repo, dir.path()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn second_snapshot_with_no_changes_is_idempotent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut repo = MemoryRepo::new();
        assert!(snapshot(&mut repo, dir.path(), 1000).unwrap());
        assert!(!snapshot(&mut repo, dir.path(), 1001).unwrap());
        assert_eq!(repo.list_states().unwrap(), vec![1000]);
    }

    #[test]
    fn restore_recreates_deleted_file_and_removes_new_one() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"keep me").unwrap();
        fs::write(dir.path().join("gone.txt"), b"will be deleted later").unwrap();

        let mut repo = MemoryRepo::new();
        assert!(snapshot(&mut repo, dir.path(), 1000).unwrap());

        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        fs::write(dir.path().join("new.txt"), b"should vanish on restore").unwrap();

        restore(&mut repo, dir.path(), 1000).unwrap();

        assert!(dir.path().join("gone.txt").exists());
        assert_eq!(fs::read(dir.path().join("gone.txt")).unwrap(), b"will be deleted later");
        assert!(!dir.path().join("new.txt").exists());
        assert!(dir.path().join("keep.txt").exists());
    }
}

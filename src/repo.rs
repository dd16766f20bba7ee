//! Repository: the durable, content-addressed store behind a working tree.
//!
//! On disk a repository is a directory holding an embedded key-value store
//! (`indexes.sled`, three trees: `strong`, `signature`, `state`) plus two
//! append-only blob files (`blocks.blob`, `sigs.blob`) that hold the actual
//! compressed payloads the trees index by offset. A best-effort snapshot of
//! the weak-hash bloom filter is written to `bloom.bin` on close, purely as
//! a warm-start hint: it is always rebuilt from the `strong` tree on open,
//! since that tree is the only source of truth for which blocks exist.
//!
//! This mirrors the bucket layout of the Bolt-backed store this design
//! replaces (`signature` and `strong` buckets, bloom filter alongside), but
//! trades Bolt's single-file transaction for sled's own per-tree durability:
//! each insert commits on its own, and "transaction" here means exclusive
//! single-writer access to the open repository handle, not a multi-tree ACID
//! boundary. A [`MemoryRepo`] gives tests the same trait surface without
//! touching disk, the same role `DummyStore` played in the ported design.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::error::RepoError;
use crate::hashing::{strong_hash, StrongHash, WeakHash};
use crate::signature::Signature;
use crate::state::DirState;

/// The narrow capability `Signature::reconstruct` needs: read a block back
/// out by its strong digest. Kept separate from [`Repository`] so callers
/// that only restore data don't have to depend on the write-side API.
pub trait BlockSource {
    fn read_block(&mut self, strong: &StrongHash) -> Result<Option<Vec<u8>>, RepoError>;
}

pub trait Repository: BlockSource {
    fn add_block(&mut self, weak: WeakHash, strong: StrongHash, data: &[u8]) -> Result<(), RepoError>;
    fn has_weak(&self, weak: WeakHash) -> bool;
    fn read_signature(&mut self, id: &StrongHash) -> Result<Option<Signature>, RepoError>;
    fn write_signature(&mut self, id: StrongHash, sig: &Signature) -> Result<(), RepoError>;
    fn read_state(&self, timestamp: i64) -> Result<Option<DirState>, RepoError>;
    fn write_state(&mut self, state: &DirState) -> Result<(), RepoError>;
    fn list_states(&self) -> Result<Vec<i64>, RepoError>;
}

/// Nearest-predecessor lookup uses this as "give me the latest snapshot".
pub const TIMESTAMP_MAX: i64 = i64::MAX;

fn state_key(timestamp: i64) -> [u8; 8] {
    (timestamp as u64).to_be_bytes()
}

fn key_to_timestamp(key: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    u64::from_be_bytes(buf) as i64
}

fn append_blob(file: &mut File, cursor: &mut u64, payload: &[u8]) -> std::io::Result<u64> {
    let offset = *cursor;
    file.seek(SeekFrom::Start(offset))?;
    file.write_u32::<LittleEndian>(payload.len() as u32)?;
    file.write_all(payload)?;
    *cursor += 4 + payload.len() as u64;
    Ok(offset)
}

fn read_blob(file: &mut File, offset: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let len = file.read_u32::<LittleEndian>()?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub struct Repo {
    #[allow(dead_code)]
    dir: PathBuf,
    db: sled::Db,
    strong_tree: sled::Tree,
    signature_tree: sled::Tree,
    state_tree: sled::Tree,
    blocks_blob: File,
    blocks_cursor: u64,
    sigs_blob: File,
    sigs_cursor: u64,
    bloom: BloomFilter,
    exact_weak: HashSet<u32>,
}

const KNOWN_ENTRIES: &[&str] = &["indexes.sled", "blocks.blob", "sigs.blob", "bloom.bin"];

impl Repo {
    pub fn open(dir: &Path) -> Result<Repo, RepoError> {
        std::fs::create_dir_all(dir)?;
        check_layout(dir)?;

        let db = sled::open(dir.join("indexes.sled"))?;
        let strong_tree = db.open_tree("strong")?;
        let signature_tree = db.open_tree("signature")?;
        let state_tree = db.open_tree("state")?;

        let mut blocks_blob = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join("blocks.blob"))?;
        let blocks_cursor = blocks_blob.seek(SeekFrom::End(0))?;

        let mut sigs_blob = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join("sigs.blob"))?;
        let sigs_cursor = sigs_blob.seek(SeekFrom::End(0))?;

        let (bloom, exact_weak) = rebuild_weak_filter(&strong_tree)?;
        tracing::debug!(blocks = exact_weak.len(), path = %dir.display(), "repository opened");

        Ok(Repo {
            dir: dir.to_path_buf(),
            db,
            strong_tree,
            signature_tree,
            state_tree,
            blocks_blob,
            blocks_cursor,
            sigs_blob,
            sigs_cursor,
            bloom,
            exact_weak,
        })
    }

    /// Commits the current state and writes the bloom warm-start hint.
    pub fn close(self) -> Result<(), RepoError> {
        self.db.flush()?;
        if let Ok(bytes) = bincode::serialize(&self.bloom) {
            let _ = std::fs::write(self.dir.join("bloom.bin"), bytes);
        }
        tracing::debug!(path = %self.dir.display(), "repository closed");
        Ok(())
    }

    /// Drops the handle without writing the bloom hint. Every block, state
    /// and signature insert up to this point has already been committed to
    /// sled and the blob files individually, so there is nothing to roll
    /// back; this only skips the warm-start snapshot.
    pub fn abort(self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Rejects a directory that already holds unrecognised entries: opening a
/// repository on top of an unrelated directory would otherwise silently
/// scatter `indexes.sled`/`blocks.blob`/`sigs.blob`/`bloom.bin` into it.
fn check_layout(dir: &Path) -> Result<(), RepoError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !KNOWN_ENTRIES.contains(&name.as_ref()) {
            return Err(RepoError::InvalidRepository {
                path: dir.display().to_string(),
                reason: format!("unexpected entry `{name}` in repository directory"),
            });
        }
    }
    Ok(())
}

fn rebuild_weak_filter(strong_tree: &sled::Tree) -> Result<(BloomFilter, HashSet<u32>), RepoError> {
    let mut bloom = BloomFilter::new();
    let mut exact = HashSet::new();
    for entry in strong_tree.iter() {
        let (_, value) = entry?;
        if value.len() >= 12 {
            let weak = u32::from_le_bytes(value[8..12].try_into().unwrap());
            bloom.add(weak);
            exact.insert(weak);
        }
    }
    Ok((bloom, exact))
}

impl BlockSource for Repo {
    fn read_block(&mut self, strong: &StrongHash) -> Result<Option<Vec<u8>>, RepoError> {
        let value = match self.strong_tree.get(strong)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let offset = u64::from_le_bytes(value[0..8].try_into().unwrap());
        let compressed = read_blob(&mut self.blocks_blob, offset)?;
        let data = zstd::decode_all(&compressed[..])?;
        if strong_hash(&data) != *strong {
            return Err(RepoError::CorruptBlock {
                strong: crate::hashing::hex_string(strong),
            });
        }
        Ok(Some(data))
    }
}

impl Repository for Repo {
    fn add_block(&mut self, weak: WeakHash, strong: StrongHash, data: &[u8]) -> Result<(), RepoError> {
        if self.strong_tree.contains_key(strong)? {
            return Ok(());
        }
        let compressed = zstd::encode_all(data, 0)?;
        let offset = append_blob(&mut self.blocks_blob, &mut self.blocks_cursor, &compressed)?;
        let mut value = Vec::with_capacity(12);
        value.extend_from_slice(&offset.to_le_bytes());
        value.extend_from_slice(&weak.to_le_bytes());
        self.strong_tree.insert(strong, value)?;
        self.bloom.add(weak);
        self.exact_weak.insert(weak);
        Ok(())
    }

    fn has_weak(&self, weak: WeakHash) -> bool {
        if !self.bloom.contains(weak) {
            return false;
        }
        self.exact_weak.contains(&weak)
    }

    fn read_signature(&mut self, id: &StrongHash) -> Result<Option<Signature>, RepoError> {
        let value = match self.signature_tree.get(id)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let offset = u64::from_le_bytes(value[0..8].try_into().unwrap());
        let compressed = read_blob(&mut self.sigs_blob, offset)?;
        let raw = zstd::decode_all(&compressed[..])?;
        Ok(Some(Signature::from_bytes(&raw)?))
    }

    fn write_signature(&mut self, id: StrongHash, sig: &Signature) -> Result<(), RepoError> {
        if self.signature_tree.contains_key(id)? {
            return Ok(());
        }
        let raw = sig.to_bytes();
        let compressed = zstd::encode_all(&raw[..], 0)?;
        let offset = append_blob(&mut self.sigs_blob, &mut self.sigs_cursor, &compressed)?;
        self.signature_tree.insert(id, offset.to_le_bytes().to_vec())?;
        Ok(())
    }

    fn read_state(&self, timestamp: i64) -> Result<Option<DirState>, RepoError> {
        let key = state_key(timestamp);
        let found = if timestamp == TIMESTAMP_MAX {
            self.state_tree.iter().next_back()
        } else {
            self.state_tree.range(..=key.as_slice()).next_back()
        };
        match found {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    fn write_state(&mut self, state: &DirState) -> Result<(), RepoError> {
        let key = state_key(state.timestamp);
        let bytes = bincode::serialize(state)?;
        self.state_tree.insert(key, bytes)?;
        Ok(())
    }

    fn list_states(&self) -> Result<Vec<i64>, RepoError> {
        let mut out = Vec::new();
        for entry in self.state_tree.iter() {
            let (key, _) = entry?;
            out.push(key_to_timestamp(&key));
        }
        Ok(out)
    }
}

/// In-memory repository used by tests: same trait surface as [`Repo`], no
/// files touched. Grounded on the ported design's in-memory store, which
/// played the same role against its `Store` interface.
#[derive(Default)]
pub struct MemoryRepo {
    blocks: HashMap<StrongHash, Vec<u8>>,
    weak_seen: HashSet<u32>,
    signatures: HashMap<StrongHash, Vec<u8>>,
    states: std::collections::BTreeMap<i64, Vec<u8>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks stored so far. Exposed for tests that
    /// assert on how many new blocks an operation should have added.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of distinct signatures stored so far. Exposed for tests that
    /// assert a read-only operation never persisted one.
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}

impl BlockSource for MemoryRepo {
    fn read_block(&mut self, strong: &StrongHash) -> Result<Option<Vec<u8>>, RepoError> {
        Ok(self.blocks.get(strong).cloned())
    }
}

impl Repository for MemoryRepo {
    fn add_block(&mut self, weak: WeakHash, strong: StrongHash, data: &[u8]) -> Result<(), RepoError> {
        if !self.blocks.contains_key(&strong) {
            self.weak_seen.insert(weak);
            self.blocks.insert(strong, data.to_vec());
        }
        Ok(())
    }

    fn has_weak(&self, weak: WeakHash) -> bool {
        self.weak_seen.contains(&weak)
    }

    fn read_signature(&mut self, id: &StrongHash) -> Result<Option<Signature>, RepoError> {
        match self.signatures.get(id) {
            Some(raw) => Ok(Some(Signature::from_bytes(raw)?)),
            None => Ok(None),
        }
    }

    fn write_signature(&mut self, id: StrongHash, sig: &Signature) -> Result<(), RepoError> {
        self.signatures.entry(id).or_insert_with(|| sig.to_bytes());
        Ok(())
    }

    fn read_state(&self, timestamp: i64) -> Result<Option<DirState>, RepoError> {
        let found = if timestamp == TIMESTAMP_MAX {
            self.states.iter().next_back()
        } else {
            self.states.range(..=timestamp).next_back()
        };
        match found {
            Some((_, bytes)) => Ok(Some(bincode::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_state(&mut self, state: &DirState) -> Result<(), RepoError> {
        self.states.insert(state.timestamp, bincode::serialize(state)?);
        Ok(())
    }

    fn list_states(&self) -> Result<Vec<i64>, RepoError> {
        Ok(self.states.keys().copied().collect())
    }
}

//! # nk — content-addressed, deduplicating snapshot engine
//!
//! Walks a directory tree, splits file content into variable-offset blocks
//! with a rolling-hash chunker, and stores each distinct block exactly
//! once, addressed by its strong hash. A directory snapshot is a signature
//! list per file plus a manifest of per-file content identities; restoring
//! a snapshot replays those signatures against the block store.
//!
//! Guarantees:
//! - A file's content is fully recovered by reconstructing its stored
//!   signature; the chunker never discards or reorders bytes.
//! - A block already present by strong hash is never stored twice.
//! - A directory state's checksum depends only on relpath/content pairs,
//!   never on scan order.
//! - Every block read back is verified against its strong hash key before
//!   being handed to a caller; a mismatch is a hard error, never silent.

pub mod bloom;
pub mod chunker;
pub mod error;
pub mod hashing;
pub mod repo;
pub mod signature;
pub mod state;

pub use error::RepoError;
pub use hashing::{strong_hash, weak_hash, weak_roll, StrongHash, WeakHash};
pub use repo::{BlockSource, MemoryRepo, Repo, Repository, TIMESTAMP_MAX};
pub use signature::{Segment, Signature};
pub use state::{restore, snapshot, status, DirState, FileState, Status};

//! Crate-wide error taxonomy.
//!
//! Every fallible core operation returns `Result<T, RepoError>`. Variants
//! correspond to the error kinds in the design notes: an IO failure aborts
//! the current operation, a corrupt or missing block is fatal to the file
//! being processed, and an absent snapshot is a soft "not found" surfaced
//! to the caller rather than a panic.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt block: strong digest of decompressed bytes does not match key {strong}")]
    CorruptBlock { strong: String },

    #[error("missing block: no data stored for strong digest {strong}")]
    MissingBlock { strong: String },

    #[error("no snapshot found")]
    NoSnapshot,

    #[error("repository storage error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),

    #[error("invalid repository at {path}: {reason}")]
    InvalidRepository { path: String, reason: String },
}

//! Segment-list signature of a byte stream, as produced by the chunker.
//!
//! A `Signature` reconstructs its source stream exactly by replaying its
//! segments in order: `Literal` segments carry their bytes inline, and
//! `Reference` segments point at a block already known to the repository.
//! The on-disk wire layout is hand-rolled (mirroring the teacher's own
//! hand-rolled block framing, now `repo::Repo`'s length-prefixed blob
//! records) rather than left to a generic serde encoding, since the layout
//! is part of the external interface.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::RepoError;
use crate::hashing::{strong_hash_of_hashes, StrongHash, WeakHash, STRONG_HASH_SIZE};

const TAG_LITERAL: u8 = 0;
const TAG_REFERENCE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal { bytes: Vec<u8>, strong: StrongHash },
    Reference { weak: WeakHash, strong: StrongHash },
}

impl Segment {
    pub fn strong(&self) -> &StrongHash {
        match self {
            Segment::Literal { strong, .. } => strong,
            Segment::Reference { strong, .. } => strong,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub segments: Vec<Segment>,
}

impl Signature {
    pub fn new() -> Self {
        Signature { segments: Vec::new() }
    }

    pub fn append_literal(&mut self, bytes: Vec<u8>) {
        let strong = crate::hashing::strong_hash(&bytes);
        self.segments.push(Segment::Literal { bytes, strong });
    }

    pub fn append_reference(&mut self, weak: WeakHash, strong: StrongHash) {
        self.segments.push(Segment::Reference { weak, strong });
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The signature's own identity: the strong hash of the concatenation
    /// of every segment's strong hash, in order. Two signatures with the
    /// same segment sequence always checksum identically.
    pub fn checksum(&self) -> StrongHash {
        let hashes: Vec<StrongHash> = self.segments.iter().map(|s| *s.strong()).collect();
        strong_hash_of_hashes(&hashes)
    }

    /// Replays the segment list, pulling `Reference` bytes from `blocks`,
    /// and writes the reconstructed stream to `sink`.
    pub fn reconstruct<W: Write>(
        &self,
        blocks: &mut impl crate::repo::BlockSource,
        sink: &mut W,
    ) -> Result<(), RepoError> {
        for segment in &self.segments {
            match segment {
                Segment::Literal { bytes, .. } => sink.write_all(bytes)?,
                Segment::Reference { strong, .. } => {
                    let data = blocks.read_block(strong)?.ok_or_else(|| RepoError::MissingBlock {
                        strong: crate::hashing::hex_string(strong),
                    })?;
                    sink.write_all(&data)?;
                }
            }
        }
        Ok(())
    }

    /// Per-segment layout: a 1-byte mode tag, a 4-byte weak hash (unused,
    /// written as zero, for `Literal` segments — they carry no weak hash of
    /// their own), 16 strong-hash bytes, and a length-prefixed byte payload
    /// that is empty for `Reference` segments.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.segments.len() as u32).unwrap();
        for segment in &self.segments {
            match segment {
                Segment::Literal { bytes, strong } => {
                    out.write_u8(TAG_LITERAL).unwrap();
                    out.write_u32::<LittleEndian>(0).unwrap();
                    out.extend_from_slice(strong);
                    out.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
                    out.extend_from_slice(bytes);
                }
                Segment::Reference { weak, strong } => {
                    out.write_u8(TAG_REFERENCE).unwrap();
                    out.write_u32::<LittleEndian>(*weak).unwrap();
                    out.extend_from_slice(strong);
                    out.write_u32::<LittleEndian>(0).unwrap();
                }
            }
        }
        out
    }

    pub fn from_bytes(mut data: &[u8]) -> io::Result<Self> {
        let count = data.read_u32::<LittleEndian>()?;
        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = data.read_u8()?;
            let weak = data.read_u32::<LittleEndian>()?;
            let mut strong = [0u8; STRONG_HASH_SIZE];
            data.read_exact(&mut strong)?;
            let len = data.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            data.read_exact(&mut bytes)?;
            match tag {
                TAG_LITERAL => {
                    segments.push(Segment::Literal { bytes, strong });
                }
                TAG_REFERENCE => {
                    segments.push(Segment::Reference { weak, strong });
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown segment tag {other}"),
                    ))
                }
            }
        }
        Ok(Signature { segments })
    }
}

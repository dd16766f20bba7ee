//! Rolling-hash chunker: turns a byte stream into a [`Signature`] while
//! registering any new block it discovers with the repository.
//!
//! Ported block-for-block from the original rsync-style chunker this
//! design is based on: two adjacent windows (`old`, `new`) of block size
//! `B` slide across the stream one byte at a time once both are full.
//! The rolling weak hash is checked against the repository on every slide;
//! a hit that also matches on the strong hash closes out a literal run and
//! emits a block reference, restarting the window search past the match.

use std::io::{Read, Write};

use crate::error::RepoError;
use crate::hashing::{strong_hash, weak_hash, weak_roll};
use crate::repo::Repository;
use crate::signature::Signature;

/// Size threshold from the ported design: files under 16 MiB use an 8 KiB
/// block, larger files use 64 KiB, trading match granularity for fewer
/// index entries on large files.
const SMALL_FILE_THRESHOLD: u64 = 16 * 1024 * 1024;
const SMALL_BLOCK_SIZE: usize = 8 * 1024;
const LARGE_BLOCK_SIZE: usize = 64 * 1024;
/// Used when the caller cannot report a length up front (e.g. a pipe).
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

pub fn block_size(known_len: u64) -> usize {
    if known_len == 0 {
        DEFAULT_BLOCK_SIZE
    } else if known_len < SMALL_FILE_THRESHOLD {
        SMALL_BLOCK_SIZE
    } else {
        LARGE_BLOCK_SIZE
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match reader.read(&mut buf[n..])? {
            0 => break,
            k => n += k,
        }
    }
    Ok(n)
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

fn register_as_block(repo: &mut impl Repository, block: &[u8]) -> Result<(u32, [u8; 16]), RepoError> {
    let strong = strong_hash(block);
    let (weak, _, _) = weak_hash(block);
    tracing::debug!(weak, strong = %crate::hashing::hex_string(&strong), "new block");
    repo.add_block(weak, strong, block)?;
    Ok((weak, strong))
}

/// Builds a [`Signature`] for the bytes read from `reader`, registering any
/// new blocks it discovers with `repo`. `known_len` is an optimization hint
/// for block sizing; pass `0` if unknown.
pub fn build_signature<R: Read>(
    reader: &mut R,
    known_len: u64,
    repo: &mut impl Repository,
) -> Result<Signature, RepoError> {
    let b = block_size(known_len);
    let mut signature = Signature::new();

    let mut old = vec![0u8; b];
    let n0 = read_full(reader, &mut old)?;
    if n0 == 0 {
        return Ok(signature);
    }
    old.truncate(n0);
    if n0 < b {
        signature.append_literal(old);
        return Ok(signature);
    }

    let mut new_buf = vec![0u8; b];
    let n1 = read_full(reader, &mut new_buf)?;
    new_buf.truncate(n1);
    if n1 < b {
        let (weak, strong) = register_as_block(repo, &old)?;
        signature.append_reference(weak, strong);
        signature.append_literal(new_buf);
        return Ok(signature);
    }

    let mut eof = false;
    let mut off: usize = 0;
    let mut last_emit: usize = 0;
    let mut rolling = false;
    let mut matched = false;
    let mut a: u32 = 0;
    let mut bacc: u32 = 0;
    let mut weak: u32 = 0;

    loop {
        if matched || off == new_buf.len() {
            if matched {
                matched = false;
                rolling = false;
                last_emit = off;
            } else {
                if last_emit > 0 {
                    signature.append_literal(old[last_emit..].to_vec());
                } else {
                    let (w, strong) = register_as_block(repo, &old)?;
                    signature.append_reference(w, strong);
                }
                off = 0;
                last_emit = 0;
            }

            if eof {
                signature.append_literal(new_buf[off..].to_vec());
                return Ok(signature);
            }

            let mut fresh = vec![0u8; b];
            let n = read_full(reader, &mut fresh)?;
            fresh.truncate(n);
            old = std::mem::replace(&mut new_buf, fresh);
            eof = n < b;
        }

        if eof && off >= new_buf.len() {
            if last_emit > 0 {
                signature.append_literal(old[last_emit..].to_vec());
            } else {
                let (w, strong) = register_as_block(repo, &old)?;
                signature.append_reference(w, strong);
            }
            signature.append_literal(new_buf[..].to_vec());
            return Ok(signature);
        }

        if !rolling {
            let window = concat(&old[off..], &new_buf[..off]);
            let (w, na, nb) = weak_hash(&window);
            weak = w;
            a = na;
            bacc = nb;
            rolling = true;
        } else {
            let push = new_buf[off];
            let pop = old[off];
            let (w, na, nb) = weak_roll(a, bacc, push, pop, b as u32);
            weak = w;
            a = na;
            bacc = nb;
            off += 1;
        }

        if repo.has_weak(weak) {
            let candidate = concat(&old[off..], &new_buf[..off]);
            let strong = strong_hash(&candidate);
            if repo.read_block(&strong)?.is_some() {
                tracing::debug!(weak, strong = %crate::hashing::hex_string(&strong), "block match");
                signature.append_literal(old[last_emit..off].to_vec());
                signature.append_reference(weak, strong);
                matched = true;
            } else {
                tracing::warn!(weak, "weak hash matched but strong hash confirmation failed");
            }
        }
    }
}

/// Thin convenience wrapper reading directly from a file path, sized by the
/// file's actual length.
pub fn build_signature_for_file(
    path: &std::path::Path,
    repo: &mut impl Repository,
) -> Result<Signature, RepoError> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    build_signature(&mut file, len, repo)
}

pub fn restore_to_file(
    sig: &Signature,
    repo: &mut impl Repository,
    path: &std::path::Path,
) -> Result<(), RepoError> {
    let mut file = std::fs::File::create(path)?;
    sig.reconstruct(repo, &mut file)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepo;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let mut repo = MemoryRepo::new();
        let mut reader = data;
        let sig = build_signature(&mut reader, data.len() as u64, &mut repo).unwrap();
        let mut out = Vec::new();
        sig.reconstruct(&mut repo, &mut out).unwrap();
        out
    }

    #[test]
    fn empty_input_yields_empty_signature() {
        let mut repo = MemoryRepo::new();
        let mut reader: &[u8] = &[];
        let sig = build_signature(&mut reader, 0, &mut repo).unwrap();
        assert!(sig.is_empty());
    }

    #[test]
    fn short_input_is_a_single_literal() {
        let data = b"hello";
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn reconstructs_arbitrary_byte_streams_exactly() {
        let sizes = [1usize, 100, 8 * 1024, 8 * 1024 + 1, 20 * 1024, 100_000];
        for &size in &sizes {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            assert_eq!(roundtrip(&data), data, "size {size}");
        }
    }

    #[test]
    fn repeated_identical_blocks_dedup_to_references() {
        let block = vec![7u8; SMALL_BLOCK_SIZE];
        let mut data = Vec::new();
        data.extend_from_slice(&block);
        data.extend_from_slice(&block);
        data.extend_from_slice(&block);

        let mut repo = MemoryRepo::new();
        let mut reader: &[u8] = &data;
        let sig = build_signature(&mut reader, data.len() as u64, &mut repo).unwrap();

        let reference_count = sig
            .segments
            .iter()
            .filter(|s| matches!(s, crate::signature::Segment::Reference { .. }))
            .count();
        assert!(reference_count >= 2, "expected at least two block references, got {reference_count}");

        let mut out = Vec::new();
        sig.reconstruct(&mut repo, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn zero_prefix_does_not_change_reconstructed_suffix() {
        let tail: Vec<u8> = (0..50_000u32).map(|i| (i % 255) as u8).collect();
        let mut prefixed = vec![0u8; 3 * SMALL_BLOCK_SIZE];
        prefixed.extend_from_slice(&tail);

        assert_eq!(roundtrip(&tail), tail);
        assert_eq!(&roundtrip(&prefixed)[3 * SMALL_BLOCK_SIZE..], tail.as_slice());
    }

    #[test]
    fn shifted_content_adds_at_most_two_new_blocks() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);
        let file: Vec<u8> = (0..SMALL_BLOCK_SIZE + 37).map(|_| rng.gen()).collect();

        let mut a = Vec::new();
        for _ in 0..200 {
            a.extend_from_slice(&file);
        }
        let mut b = vec![rng.gen()];
        b.extend_from_slice(&a);

        let mut repo = MemoryRepo::new();
        let mut reader: &[u8] = &a;
        let sig_a = build_signature(&mut reader, a.len() as u64, &mut repo).unwrap();
        let blocks_after_a = repo.block_count();

        let mut reader: &[u8] = &b;
        let sig_b = build_signature(&mut reader, b.len() as u64, &mut repo).unwrap();
        let new_blocks_for_b = repo.block_count() - blocks_after_a;
        assert!(new_blocks_for_b <= 2, "expected at most 2 new blocks, got {new_blocks_for_b}");

        let mut out_a = Vec::new();
        sig_a.reconstruct(&mut repo, &mut out_a).unwrap();
        assert_eq!(out_a, a);

        let mut out_b = Vec::new();
        sig_b.reconstruct(&mut repo, &mut out_b).unwrap();
        assert_eq!(out_b, b);
    }
}

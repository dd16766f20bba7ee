//! Probabilistic weak-hash membership filter.
//!
//! Sized for roughly 1,048,576 distinct weak hashes at a 0.1% false-positive
//! rate: 14 * 2^22 bits (~14 MB) and 10 hash functions, the same constants
//! the ported design used for its bloom filter. The filter never produces a
//! false negative by construction; callers layer an exact weak-hash set on
//! top to cancel out false positives cheaply (see `repo::Repo::has_weak`).

use serde::{Deserialize, Serialize};

const NUM_BITS: u64 = 14 * (1u64 << 22);
const NUM_HASHES: u32 = 10;

#[derive(Serialize, Deserialize, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomFilter {
    pub fn new() -> Self {
        let words = (NUM_BITS as usize).div_ceil(64);
        BloomFilter {
            bits: vec![0u64; words],
            num_bits: NUM_BITS,
            num_hashes: NUM_HASHES,
        }
    }

    pub fn add(&mut self, weak: u32) {
        let (mut h1, mut h2) = split(weak);
        for i in 0..self.num_hashes {
            let bit = self.slot(h1, h2, i);
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(0x9e3779b97f4a7c15);
        }
    }

    pub fn contains(&self, weak: u32) -> bool {
        let (mut h1, mut h2) = split(weak);
        for i in 0..self.num_hashes {
            let bit = self.slot(h1, h2, i);
            if self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(0x9e3779b97f4a7c15);
        }
        true
    }

    fn slot(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

/// Splits a weak hash into two independent 64-bit seeds via splitmix64, so
/// that the `i`-th probe location is `h1 + i*h2` (Kirsch-Mitzenmacher
/// double hashing) without needing ten distinct hash function families.
fn split(weak: u32) -> (u64, u64) {
    let mut x = weak as u64;
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    let h1 = mix(x);
    let h2 = mix(h1 ^ 0xbf58476d1ce4e5b9);
    (h1, h2 | 1)
}

fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_false_negative() {
        let mut f = BloomFilter::new();
        for w in [0u32, 1, 42, 1_000_000, u32::MAX] {
            f.add(w);
        }
        for w in [0u32, 1, 42, 1_000_000, u32::MAX] {
            assert!(f.contains(w));
        }
    }

    #[test]
    fn round_trips_through_bincode() {
        let mut f = BloomFilter::new();
        f.add(7);
        let bytes = bincode::serialize(&f).unwrap();
        let back: BloomFilter = bincode::deserialize(&bytes).unwrap();
        assert!(back.contains(7));
    }
}

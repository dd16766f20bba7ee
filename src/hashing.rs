//! Weak and strong content hashes used by the chunker and block store.
//!
//! The weak hash is a cheap, incrementally updatable rolling checksum over a
//! fixed-size window, used only to narrow candidates before paying for a
//! strong hash. The strong hash is BLAKE3 truncated to 16 bytes: wide enough
//! that accidental collisions are not a practical concern for content
//! addressing, and an upgrade over the MD5 digest used by the system this
//! design was ported from.

pub const STRONG_HASH_SIZE: usize = 16;
pub type StrongHash = [u8; STRONG_HASH_SIZE];
pub type WeakHash = u32;

/// Modulus for both rolling-hash accumulators. Chosen so that
/// `a + M * b` packs losslessly into a u32 (`M * M == 1 << 32`).
const M: u64 = 1 << 16;

pub fn strong_hash(data: &[u8]) -> StrongHash {
    let digest = blake3::hash(data);
    let mut out = [0u8; STRONG_HASH_SIZE];
    out.copy_from_slice(&digest.as_bytes()[..STRONG_HASH_SIZE]);
    out
}

pub fn strong_hash_of_hashes(hashes: &[StrongHash]) -> StrongHash {
    let mut hasher = blake3::Hasher::new();
    for h in hashes {
        hasher.update(h);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; STRONG_HASH_SIZE];
    out.copy_from_slice(&digest.as_bytes()[..STRONG_HASH_SIZE]);
    out
}

/// Computes the weak hash of a window from scratch, along with the two
/// accumulators needed to roll it forward afterwards.
pub fn weak_hash(window: &[u8]) -> (WeakHash, u32, u32) {
    let len = window.len() as u64;
    let mut a: u64 = 0;
    let mut b: u64 = 0;
    for (i, &byte) in window.iter().enumerate() {
        a += byte as u64;
        b += (len - i as u64) * byte as u64;
    }
    a %= M;
    b %= M;
    let weak = (a as u32) + ((M as u32) * (b as u32));
    (weak, a as u32, b as u32)
}

/// Advances the rolling hash by one byte: `pop` leaves the window, `push`
/// enters it. `window_len` is the fixed window size (the block size).
///
/// Accumulators are carried in `i64` and reduced with `rem_euclid` so that
/// the subtraction never relies on unsigned wraparound to stay correct.
pub fn weak_roll(a: u32, b: u32, push: u8, pop: u8, window_len: u32) -> (WeakHash, u32, u32) {
    let m = M as i64;
    let a2 = (a as i64 - pop as i64 + push as i64).rem_euclid(m);
    let b2 = (b as i64 - (window_len as i64) * (pop as i64) + a2).rem_euclid(m);
    let weak = (a2 as u32) + ((M as u32) * (b2 as u32));
    (weak, a2 as u32, b2 as u32)
}

pub fn hex_string(strong: &StrongHash) -> String {
    hex::encode(strong)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Rolling the weak hash forward one byte at a time must always
        /// agree with recomputing it from scratch over the same window.
        #[test]
        fn rolling_matches_recompute(
            data in proptest::collection::vec(any::<u8>(), 16..512),
            window in 1usize..16,
        ) {
            prop_assume!(window <= data.len());
            let (mut weak, mut a, mut b) = weak_hash(&data[0..window]);
            for off in 1..=(data.len() - window) {
                let expected = weak_hash(&data[off..off + window]);
                let push = data[off + window - 1];
                let pop = data[off - 1];
                let (w, na, nb) = weak_roll(a, b, push, pop, window as u32);
                prop_assert_eq!((w, na, nb), expected);
                weak = w;
                a = na;
                b = nb;
            }
            let _ = weak;
        }
    }
}

//! Character-shingle MinHash
//!
//! Lexical near-duplicate similarity for records without embeddings.
//! Signatures are built from 5-character shingles hashed through a fixed
//! family of permutations; comparing two signatures estimates the Jaccard
//! similarity of the underlying shingle sets.

use std::hash::{Hash, Hasher};

/// Shingle width in characters.
pub const SHINGLE_LEN: usize = 5;

/// Number of hash permutations in a signature.
pub const SIGNATURE_LEN: usize = 128;

/// Fixed seed so signatures are comparable across processes and runs.
const FAMILY_SEED: u64 = 0x51_7c_c1_b7_27_22_0a_95;

/// A MinHash signature over one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature {
    mins: Vec<u64>,
}

impl MinHashSignature {
    /// Estimated Jaccard similarity to another signature.
    pub fn estimate_jaccard(&self, other: &MinHashSignature) -> f64 {
        if self.mins.len() != other.mins.len() || self.mins.is_empty() {
            return 0.0;
        }
        let equal = self
            .mins
            .iter()
            .zip(&other.mins)
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.mins.len() as f64
    }
}

/// Builds signatures with a shared permutation family.
#[derive(Debug, Clone)]
pub struct MinHasher {
    perms: Vec<(u64, u64)>,
}

impl Default for MinHasher {
    fn default() -> Self {
        Self::new(SIGNATURE_LEN)
    }
}

impl MinHasher {
    /// A hasher with `permutations` hash functions derived from the fixed
    /// family seed.
    pub fn new(permutations: usize) -> Self {
        let mut state = FAMILY_SEED;
        let perms = (0..permutations)
            .map(|_| {
                // Multipliers must be odd to stay bijective mod 2^64.
                let a = splitmix64(&mut state) | 1;
                let b = splitmix64(&mut state);
                (a, b)
            })
            .collect();
        Self { perms }
    }

    /// Signature of `text`. Texts shorter than one shingle hash as a single
    /// shingle so tiny contents still compare.
    pub fn signature(&self, text: &str) -> MinHashSignature {
        let chars: Vec<char> = text.chars().collect();
        let mut mins = vec![u64::MAX; self.perms.len()];

        let mut absorb = |shingle: &[char]| {
            let base = base_hash(shingle);
            for (min, (a, b)) in mins.iter_mut().zip(&self.perms) {
                let h = base.wrapping_mul(*a).wrapping_add(*b);
                if h < *min {
                    *min = h;
                }
            }
        };

        if chars.len() <= SHINGLE_LEN {
            absorb(&chars);
        } else {
            for window in chars.windows(SHINGLE_LEN) {
                absorb(window);
            }
        }
        MinHashSignature { mins }
    }
}

fn base_hash(shingle: &[char]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    shingle.hash(&mut hasher);
    hasher.finish()
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_estimate_one() {
        let hasher = MinHasher::default();
        let a = hasher.signature("the quick brown fox jumps over the lazy dog");
        let b = hasher.signature("the quick brown fox jumps over the lazy dog");
        assert_eq!(a.estimate_jaccard(&b), 1.0);
    }

    #[test]
    fn test_disjoint_texts_estimate_near_zero() {
        let hasher = MinHasher::default();
        let a = hasher.signature("completely unrelated content about databases");
        let b = hasher.signature("zebras gallop across wide open savannas");
        assert!(a.estimate_jaccard(&b) < 0.15);
    }

    #[test]
    fn test_near_duplicates_rank_above_strangers() {
        let hasher = MinHasher::default();
        let base = hasher.signature("prefer rust for systems programming work");
        let near = hasher.signature("prefer rust for systems programming tasks");
        let far = hasher.signature("the cafeteria closes at three on fridays");
        assert!(base.estimate_jaccard(&near) > base.estimate_jaccard(&far));
        assert!(base.estimate_jaccard(&near) > 0.5);
    }

    #[test]
    fn test_short_texts_compare() {
        let hasher = MinHasher::default();
        let a = hasher.signature("abc");
        let b = hasher.signature("abc");
        let c = hasher.signature("xyz");
        assert_eq!(a.estimate_jaccard(&b), 1.0);
        assert!(a.estimate_jaccard(&c) < 0.05);
    }

    #[test]
    fn test_signatures_deterministic_across_hashers() {
        let a = MinHasher::default().signature("stable across instances");
        let b = MinHasher::default().signature("stable across instances");
        assert_eq!(a, b);
    }
}

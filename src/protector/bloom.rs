//! Fixed-size Bloom filter used as a cheap admission check before a
//! distributed-cache lookup: a tag absent from the filter is guaranteed
//! never to have been written, so the lookup (and its negative-cache path)
//! can be skipped entirely.
//!
//! No false negatives by construction; false positives are expected and
//! harmless (they just fall through to the normal lookup path).

use std::sync::atomic::{AtomicU64, Ordering};

pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(size_bits: u64, num_hashes: u32) -> Self {
        let words = (size_bits.max(64) / 64) + 1;
        let mut bits = Vec::with_capacity(words as usize);
        bits.resize_with(words as usize, || AtomicU64::new(0));
        Self {
            bits,
            num_bits: words * 64,
            num_hashes: num_hashes.max(1),
        }
    }

    fn hash_indices(&self, key: &str) -> impl Iterator<Item = u64> + '_ {
        let h1 = fnv1a(key, 0xcbf29ce484222325);
        let h2 = fnv1a(key, 0x100000001b3);
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2))) % self.num_bits)
    }

    /// Marks `key` as present. Safe to call concurrently from many tasks:
    /// each bit is set with a single atomic `fetch_or`, so writers never
    /// need to coordinate.
    pub fn insert(&self, key: &str) {
        for idx in self.hash_indices(key) {
            let (word, bit) = (idx / 64, idx % 64);
            self.bits[word as usize].fetch_or(1 << bit, Ordering::Relaxed);
        }
    }

    /// `false` is a definite answer: `key` was never inserted. `true` may be
    /// a false positive.
    pub fn might_contain(&self, key: &str) -> bool {
        self.hash_indices(key).all(|idx| {
            let (word, bit) = (idx / 64, idx % 64);
            self.bits[word as usize].load(Ordering::Relaxed) & (1 << bit) != 0
        })
    }
}

fn fnv1a(s: &str, seed: u64) -> u64 {
    let mut hash = seed;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

//! The BIP-37 bloom filter loaded onto peers to subscribe to relevant
//! transactions without revealing the exact wallet contents.

use rand::Rng;

use crate::protocol::external::types::{Filter, Tweak};
use crate::protocol::external::Message;

/// The maximum filter size, in bytes.
pub const MAX_FILTER_BYTES: usize = 36_000;
/// The maximum number of hash functions.
pub const MAX_HASH_FUNCS: u32 = 50;
/// The seed multiplier fixed by BIP 37.
const SEED_STEP: u32 = 0xFBA4_C795;

/// Filter update flags: whether the serving peer inserts outpoints of
/// matched outputs back into the filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UpdateFlag {
    /// Never update the filter.
    None = 0,
    /// Update on every match.
    All = 1,
    /// Update only for pay-to-pubkey and multisig outputs.
    PubKeyOnly = 2,
}

/// A bloom filter over arbitrary byte elements.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    hash_funcs: u32,
    tweak: Tweak,
    flags: UpdateFlag,
}

impl BloomFilter {
    /// Size a filter for `element_count` insertions at `false_positive_rate`.
    ///
    /// The tweak is randomized per filter so observers cannot intersect
    /// filters across reconnects.
    pub fn new(element_count: usize, false_positive_rate: f64, flags: UpdateFlag) -> BloomFilter {
        let n = element_count.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 1.0);

        let ln2 = std::f64::consts::LN_2;
        let bytes = (((-n * p.ln()) / (ln2 * ln2)) / 8.0).ceil() as usize;
        let bytes = bytes.clamp(1, MAX_FILTER_BYTES);

        let hash_funcs = ((bytes as f64 * 8.0 / n) * ln2).round() as u32;
        let hash_funcs = hash_funcs.clamp(1, MAX_HASH_FUNCS);

        BloomFilter {
            bits: vec![0u8; bytes],
            hash_funcs,
            tweak: Tweak(rand::thread_rng().gen()),
            flags,
        }
    }

    /// Rebuild a filter from its wire parts (for tests and persistence).
    pub fn from_parts(bits: Vec<u8>, hash_funcs: u32, tweak: Tweak, flags: UpdateFlag) -> BloomFilter {
        BloomFilter {
            bits,
            hash_funcs,
            tweak,
            flags,
        }
    }

    fn bit_index(&self, function: u32, data: &[u8]) -> usize {
        let seed = function
            .wrapping_mul(SEED_STEP)
            .wrapping_add(self.tweak.0);
        murmur3(seed, data) as usize % (self.bits.len() * 8)
    }

    /// Insert an element.
    pub fn insert(&mut self, data: &[u8]) {
        for function in 0..self.hash_funcs {
            let index = self.bit_index(function, data);
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Whether an element may be in the filter (definitely-absent on
    /// `false`).
    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs).all(|function| {
            let index = self.bit_index(function, data);
            self.bits[index / 8] >> (index % 8) & 1 == 1
        })
    }

    /// The `filterload` message installing this filter.
    pub fn to_load_message(&self) -> Message {
        Message::FilterLoad {
            filter: Filter(self.bits.clone()),
            hash_functions_count: self.hash_funcs,
            tweak: self.tweak,
            flags: self.flags as u8,
        }
    }
}

/// Murmur3 32-bit, the hash fixed by BIP 37.
fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut k = 0u32;
        for (index, &byte) in remainder.iter().enumerate() {
            k |= (byte as u32) << (8 * index);
        }
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_reference_vectors() {
        // Standard MurmurHash3 x86_32 vectors.
        assert_eq!(murmur3(0, b""), 0);
        assert_eq!(murmur3(1, b""), 0x514E28B7);
        assert_eq!(murmur3(0, b"hello"), 0x248BFA47);
        assert_eq!(murmur3(0x9747b28c, b"hello, world"), 0x9A933E00);
    }

    #[test]
    fn inserted_elements_always_match() {
        kestrel_test::init();

        let mut filter = BloomFilter::new(1000, 0.001, UpdateFlag::None);
        let elements: Vec<Vec<u8>> = (0u32..1000)
            .map(|index| {
                let mut element = index.to_le_bytes().to_vec();
                element.extend_from_slice(b"-kestrel-script");
                element
            })
            .collect();

        for element in elements.iter() {
            filter.insert(element);
        }
        for element in elements.iter() {
            assert!(filter.contains(element));
        }
    }

    #[test]
    fn false_positive_rate_is_in_range() {
        kestrel_test::init();

        let mut filter = BloomFilter::new(1000, 0.001, UpdateFlag::None);
        for index in 0u32..1000 {
            filter.insert(&index.to_le_bytes());
        }

        // 10,000 elements that were never inserted.
        let false_positives = (0u32..10_000)
            .filter(|index| filter.contains(&(index + 1_000_000).to_le_bytes()))
            .count();

        // Within ±50% of the requested 0.001 means 5..=15 of 10,000, with
        // slack for hash variance.
        assert!(
            false_positives <= 30,
            "false positive rate too high: {}/10000",
            false_positives
        );
    }

    #[test]
    fn load_message_carries_filter() {
        kestrel_test::init();

        let mut filter = BloomFilter::new(10, 0.01, UpdateFlag::All);
        filter.insert(b"watch me");

        match filter.to_load_message() {
            Message::FilterLoad {
                filter: Filter(bits),
                hash_functions_count,
                flags,
                ..
            } => {
                assert!(!bits.is_empty());
                assert!(hash_functions_count <= MAX_HASH_FUNCS);
                assert_eq!(flags, UpdateFlag::All as u8);
            }
            other => panic!("expected FilterLoad, got {:?}", other),
        }
    }
}

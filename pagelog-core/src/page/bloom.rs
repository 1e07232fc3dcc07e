//! Bloom filter over trace ids

use crate::{LogsError, Result};
use bytes::{Buf, BufMut, BytesMut};

const SEED_PRIMARY: u32 = 0x9747_b28c;
const SEED_SECONDARY: u32 = 0x85eb_ca6b;
const MIN_BITS: usize = 64;

/// Bloom filter implementation.
///
/// Hashing is CRC32-based with two fixed seeds, so a filter written by one
/// process answers identically when read back by another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a new bloom filter
    pub fn new(num_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (num_keys * bits_per_key).max(MIN_BITS);
        let num_bytes = (num_bits + 7) / 8;

        // Optimal number of hash functions
        let num_hashes = ((bits_per_key as f64) * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Add a key to the filter
    pub fn insert(&mut self, key: &str) {
        let (h1, h2) = Self::hash_key(key);

        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.set_bit(bit);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &str) -> bool {
        let (h1, h2) = Self::hash_key(key);

        (0..self.num_hashes).all(|i| self.get_bit(self.bit_position(h1, h2, i)))
    }

    /// Get number of hash functions
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Size of the bit array
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Estimated false positive rate
    pub fn false_positive_rate(&self, num_keys: usize) -> f64 {
        let k = self.num_hashes as f64;
        let m = self.num_bits as f64;
        let n = num_keys as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Serialize as `hashes:u8, byteLen:i32, bit array`
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(5 + self.bits.len());
        buf.put_u8(self.num_hashes as u8);
        buf.put_i32(self.bits.len() as i32);
        buf.put_slice(&self.bits);
        buf
    }

    /// Restore a filter written by [`BloomFilter::to_bytes`]
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(LogsError::InvalidFormat("Bloom filter data too short".into()));
        }
        let num_hashes = data.get_u8() as usize;
        let len = data.get_i32();
        if num_hashes == 0 || len <= 0 || len as usize != data.len() {
            return Err(LogsError::InvalidFormat(format!(
                "Bad bloom filter shape: {} hashes, {} declared bytes, {} present",
                num_hashes,
                len,
                data.len()
            )));
        }

        Ok(Self {
            bits: data.to_vec(),
            num_bits: data.len() * 8,
            num_hashes,
        })
    }

    fn hash_key(key: &str) -> (u64, u64) {
        let mut primary = crc32fast::Hasher::new_with_initial(SEED_PRIMARY);
        primary.update(key.as_bytes());
        let mut secondary = crc32fast::Hasher::new_with_initial(SEED_SECONDARY);
        secondary.update(key.as_bytes());
        (primary.finalize() as u64, (secondary.finalize() as u64) | 1)
    }

    fn bit_position(&self, h1: u64, h2: u64, i: usize) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % self.num_bits as u64) as usize
    }

    fn set_bit(&mut self, bit: usize) {
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    fn get_bit(&self, bit: usize) -> bool {
        (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
    }
}

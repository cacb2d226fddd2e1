//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in the engine
//!
//! Every SSTable has a companion `sst-<id>.bloom` file holding the filter built
//! from its keys. During point lookups the table checks the filter first -- if
//! it says "not present", the data file is never touched.
//!
//! ## Persisted record
//!
//! ```text
//! [num_hashes: u32][num_bytes: u32][crc32(bits): u32][bits: num_bytes]
//! ```
//!
//! The checksum is recomputed on load; a mismatch is reported as
//! [`BloomError::ChecksumMismatch`] and the owning table must be treated as
//! unreadable.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Safety cap: a persisted filter larger than this is rejected as corrupt.
pub const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// Size of the fixed record header: `num_hashes + num_bytes + crc32`.
pub const HEADER_BYTES: usize = 4 + 4 + 4;

/// Errors raised while loading a persisted bloom filter.
#[derive(Debug, Error)]
pub enum BloomError {
    /// An underlying I/O error (including a truncated record).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stored CRC32 does not match the bit array.
    #[error("bloom checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Header fields are out of range or the record has trailing bytes.
    #[error("malformed bloom record: {0}")]
    Malformed(String),
}

/// A bloom filter backed by a bit vector with `k` independent hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are derived
/// from FNV-1a with two different seeds. The number of bits is always a
/// multiple of 8 so the persisted byte count fully describes the filter.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
    /// target `false_positive_rate`.
    ///
    /// The bit array never exceeds [`MAX_BLOOM_BYTES`]; past that size the
    /// false-positive rate rises above the target instead.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items as f64;
        let num_bytes = optimal_num_bytes(expected_items, false_positive_rate);

        // Optimal number of hashes: k = (m/n) * ln(2)
        let m = (num_bytes * 8) as f64;
        let k = ((m / n) * std::f64::consts::LN_2).ceil() as u32;

        Self::with_size(num_bytes, k.max(1))
    }

    /// Creates a filter with an explicit bit-array size (in bytes) and number
    /// of hash functions.
    ///
    /// # Panics
    ///
    /// Panics if either argument is 0.
    pub fn with_size(num_bytes: usize, num_hashes: u32) -> Self {
        assert!(num_bytes > 0, "num_bytes must be > 0");
        assert!(num_hashes > 0, "num_hashes must be > 0");
        Self {
            bits: vec![0u8; num_bytes],
            num_hashes,
        }
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| self.get_bit(self.bit_index(h1, h2, i)))
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.bits.len() as u64 * 8
    }

    /// Returns the size of the bit array in bytes.
    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.bits.len()
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Raw bit array.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// CRC32 of the bit array, as stored in the persisted record.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.bits)
    }

    /// Returns the size of the persisted record in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        HEADER_BYTES + self.bits.len()
    }

    /// Serializes the filter as a single checksummed record.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u32::<LittleEndian>(self.bits.len() as u32)?;
        w.write_u32::<LittleEndian>(self.checksum())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a filter, verifying the bit-array checksum.
    ///
    /// The reader must contain exactly one record; trailing bytes are
    /// rejected so a concatenated or partially overwritten file is not
    /// silently accepted.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, BloomError> {
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let num_bytes = r.read_u32::<LittleEndian>()? as usize;
        let expected = r.read_u32::<LittleEndian>()?;

        if num_hashes == 0 {
            return Err(BloomError::Malformed("zero hash functions".into()));
        }
        if num_bytes == 0 || num_bytes > MAX_BLOOM_BYTES {
            return Err(BloomError::Malformed(format!(
                "bit array size {} out of range",
                num_bytes
            )));
        }

        let mut bits = vec![0u8; num_bytes];
        r.read_exact(&mut bits)?;

        let mut trailing = [0u8; 1];
        if r.read(&mut trailing)? != 0 {
            return Err(BloomError::Malformed("trailing bytes after record".into()));
        }

        let actual = crc32fast::hash(&bits);
        if actual != expected {
            return Err(BloomError::ChecksumMismatch { expected, actual });
        }

        Ok(Self { bits, num_hashes })
    }

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits()
    }

    fn set_bit(&mut self, idx: u64) {
        self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
    }

    fn get_bit(&self, idx: u64) -> bool {
        (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
    }
}

/// How a table sizes its bloom filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BloomPolicy {
    /// Sized from the table's entry count for a target false-positive rate.
    FalsePositiveRate(f64),
    /// Fixed bit array and hash count, independent of entry count.
    Fixed { num_bytes: usize, num_hashes: u32 },
}

impl Default for BloomPolicy {
    fn default() -> Self {
        BloomPolicy::FalsePositiveRate(0.01)
    }
}

impl BloomPolicy {
    /// Returns an empty filter for a table expected to hold `expected_items`
    /// keys. An estimate of 0 is treated as 1.
    pub fn build(&self, expected_items: usize) -> BloomFilter {
        match *self {
            BloomPolicy::FalsePositiveRate(fpr) => BloomFilter::new(expected_items.max(1), fpr),
            BloomPolicy::Fixed {
                num_bytes,
                num_hashes,
            } => BloomFilter::with_size(num_bytes, num_hashes),
        }
    }

    /// Checks the parameters without building a filter.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            BloomPolicy::FalsePositiveRate(fpr) if !(fpr > 0.0 && fpr < 1.0) => {
                Err(format!("bloom false positive rate {} not in (0, 1)", fpr))
            }
            BloomPolicy::Fixed { num_bytes, .. } if num_bytes == 0 || num_bytes > MAX_BLOOM_BYTES => {
                Err(format!("bloom size {} bytes out of range", num_bytes))
            }
            BloomPolicy::Fixed { num_hashes: 0, .. } => Err("bloom hash count must be > 0".into()),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits())
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Optimal bit array size in bytes, `m = -n * ln(p) / ln(2)^2` bits,
/// clamped to `[1, MAX_BLOOM_BYTES]`.
fn optimal_num_bytes(expected_items: usize, false_positive_rate: f64) -> usize {
    let n = expected_items as f64;
    let m = (-n * false_positive_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
    let num_bytes = (m.max(8) + 7) / 8;
    num_bytes.min(MAX_BLOOM_BYTES as u64) as usize
}

/// Computes two independent 64-bit hashes using FNV-1a with different seeds.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = fnv1a_64(key, 0xcbf29ce484222325);
    let h2 = fnv1a_64(key, 0x517cc1b727220a95);
    (h1, h2)
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

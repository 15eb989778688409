//! Encoder tuning parameters.

use crate::format::MATCHES_PER_BLOCK;
use oxiarc_core::error::{OxiArcError, Result};

/// Smallest accepted back-end capacity, in matches.
///
/// The front end may hand the back end a literal run of up to eight maximal
/// L values in one go, which must fit into an empty block.
pub const MIN_MATCHES_PER_BLOCK: usize = 1024;

/// LZFSE encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzfseConfig {
    /// Matches at least this long are emitted without waiting for a
    /// better candidate at the next position.
    pub good_match_length: u32,
    /// Log2 of the number of history buckets (10-16).
    pub hash_bits: u32,
    /// Triplets per emitted block; literal capacity is four times this.
    pub matches_per_block: usize,
    /// Inputs shorter than this are stored uncompressed.
    pub min_compress_size: usize,
}

impl LzfseConfig {
    /// Parameters of the reference encoder.
    pub const DEFAULT: Self = Self {
        good_match_length: 40,
        hash_bits: 14,
        matches_per_block: MATCHES_PER_BLOCK,
        min_compress_size: 4096,
    };

    /// Create a configuration with the default parameters.
    pub fn new() -> Self {
        Self::DEFAULT
    }

    /// Set the good match length.
    pub fn with_good_match_length(mut self, length: u32) -> Self {
        self.good_match_length = length;
        self
    }

    /// Set the history table size.
    pub fn with_hash_bits(mut self, bits: u32) -> Self {
        self.hash_bits = bits;
        self
    }

    /// Set the back-end block capacity.
    pub fn with_matches_per_block(mut self, matches: usize) -> Self {
        self.matches_per_block = matches;
        self
    }

    /// Set the minimum input size for LZFSE compression.
    pub fn with_min_compress_size(mut self, size: usize) -> Self {
        self.min_compress_size = size;
        self
    }

    /// Literal capacity of the back end.
    pub fn literals_per_block(&self) -> usize {
        4 * self.matches_per_block
    }

    /// Number of history buckets.
    pub fn hash_size(&self) -> usize {
        1 << self.hash_bits
    }

    /// Check every parameter against the range the encoder supports.
    pub fn validate(&self) -> Result<()> {
        if !(10..=16).contains(&self.hash_bits) {
            return Err(OxiArcError::invalid_config(format!(
                "hash_bits {} not in 10..=16",
                self.hash_bits
            )));
        }
        if !(MIN_MATCHES_PER_BLOCK..=MATCHES_PER_BLOCK).contains(&self.matches_per_block) {
            return Err(OxiArcError::invalid_config(format!(
                "matches_per_block {} not in {}..={}",
                self.matches_per_block, MIN_MATCHES_PER_BLOCK, MATCHES_PER_BLOCK
            )));
        }
        if self.good_match_length < 4 {
            return Err(OxiArcError::invalid_config(format!(
                "good_match_length {} below the minimum match of 4",
                self.good_match_length
            )));
        }
        Ok(())
    }
}

impl Default for LzfseConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

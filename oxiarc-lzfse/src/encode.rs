//! LZFSE stream encoder.
//!
//! [`LzfseEncoder`] owns the scratch memory of the match finder and the
//! block buffers, so repeated calls do not allocate. Inputs too small to be
//! worth compressing, and inputs whose compressed form does not fit the
//! destination, are stored as uncompressed blocks instead.

use crate::backend::{EncodeState, Full};
use crate::config::LzfseConfig;
use crate::format::{
    ENDOFSTREAM_BLOCK_MAGIC, ENDOFSTREAM_SIZE, UNCOMPRESSED_BLOCK_MAGIC, UNCOMPRESSED_HEADER_SIZE,
};
use crate::frontend::{HistorySet, Match};
use oxiarc_core::error::{OxiArcError, Result};
use oxiarc_core::traits::{CompressStatus, Compressor};
use tracing::{debug, trace};

/// Inputs at least this long are encoded in translated chunks.
pub(crate) const CHUNK_THRESHOLD: usize = 0xffff_ffff;

/// Source window advance per chunk.
const CHUNK_SIZE: usize = 262_144;

/// Inputs shorter than this are always stored.
const MIN_SOURCE_SIZE: usize = 8;

/// Largest payload of one uncompressed block.
const MAX_STORED_BLOCK: usize = u32::MAX as usize;

/// LZFSE encoder with reusable scratch memory.
///
/// # Example
///
/// ```
/// use oxiarc_lzfse::{LzfseConfig, LzfseEncoder, decompress};
///
/// let data = b"a fairly repetitive line of text\n".repeat(500);
/// let mut encoder = LzfseEncoder::with_config(LzfseConfig::new().with_hash_bits(12)).unwrap();
/// let mut compressed = vec![0u8; data.len()];
/// let n = encoder.encode(&data, &mut compressed).unwrap();
/// assert!(n < data.len() / 4);
/// assert_eq!(decompress(&compressed[..n]).unwrap(), data);
/// ```
#[derive(Debug, Clone)]
pub struct LzfseEncoder {
    config: LzfseConfig,
    history: Vec<HistorySet>,
    l_values: Vec<u32>,
    m_values: Vec<u32>,
    d_values: Vec<u32>,
    literals: Vec<u8>,
    chunk_threshold: usize,
    total_out: usize,
}

impl Default for LzfseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzfseEncoder {
    /// Create an encoder with the default configuration.
    pub fn new() -> Self {
        Self::allocate(LzfseConfig::DEFAULT)
    }

    /// Create an encoder with a custom configuration.
    pub fn with_config(config: LzfseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::allocate(config))
    }

    fn allocate(config: LzfseConfig) -> Self {
        let matches = config.matches_per_block;
        Self {
            config,
            history: vec![HistorySet::EMPTY; config.hash_size()],
            l_values: vec![0; matches],
            m_values: vec![0; matches],
            d_values: vec![0; matches],
            literals: vec![0; config.literals_per_block()],
            chunk_threshold: CHUNK_THRESHOLD,
            total_out: 0,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &LzfseConfig {
        &self.config
    }

    /// Bytes of scratch memory an encoder with `config` holds.
    pub fn scratch_size_for(config: &LzfseConfig) -> usize {
        config.hash_size() * std::mem::size_of::<HistorySet>()
            + 3 * config.matches_per_block * std::mem::size_of::<u32>()
            + config.literals_per_block()
    }

    /// Encode `src` as a complete stream into `dst`, returning its size.
    ///
    /// Fails with [`OxiArcError::BufferTooSmall`] when neither the
    /// compressed stream nor the stored fallback fits.
    pub fn encode(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        self.total_out = 0;
        let n = if src.len() < MIN_SOURCE_SIZE || src.len() < self.config.min_compress_size {
            trace!(src_len = src.len(), "input below compression threshold");
            store_uncompressed(src, dst)?
        } else {
            match self.encode_lzfse(src, dst) {
                Ok(n) => n,
                Err(Full) => {
                    debug!(
                        src_len = src.len(),
                        dst_len = dst.len(),
                        "compressed stream does not fit, storing uncompressed"
                    );
                    store_uncompressed(src, dst)?
                }
            }
        };
        self.total_out = n;
        Ok(n)
    }

    fn encode_lzfse(&mut self, src: &[u8], dst: &mut [u8]) -> std::result::Result<usize, Full> {
        self.history.fill(HistorySet::EMPTY);
        let config = self.config;
        let chunked = src.len() >= self.chunk_threshold.max(CHUNK_SIZE);
        let mut s = EncodeState {
            src,
            base: 0,
            src_end: 0,
            src_literal: 0,
            src_encode_i: 0,
            pending: Match::NONE,
            history: &mut self.history,
            hash_bits: config.hash_bits,
            good_match_length: config.good_match_length,
            matches_cap: config.matches_per_block,
            literals_cap: config.literals_per_block(),
            n_matches: 0,
            n_literals: 0,
            l_values: &mut self.l_values,
            m_values: &mut self.m_values,
            d_values: &mut self.d_values,
            literals: &mut self.literals,
            dst,
            dst_pos: 0,
        };

        if chunked {
            // Positions stay within two chunks: each pass scans the second
            // chunk, then the window slides by one.
            let chunk = CHUNK_SIZE as i64;
            let mut remaining = src.len() - CHUNK_SIZE;
            s.src_end = chunk;
            s.encode_base()?;
            while remaining >= CHUNK_SIZE {
                s.src_end = 2 * chunk;
                s.encode_base()?;
                s.translate(chunk);
                remaining -= CHUNK_SIZE;
            }
            s.src_end = chunk + remaining as i64;
            trace!(base = s.base, "encoding final chunk");
        } else {
            s.src_end = src.len() as i64;
        }
        s.encode_base()?;
        s.finish()?;
        Ok(s.dst_pos)
    }
}

/// Write `src` as uncompressed blocks followed by the end-of-stream block.
pub(crate) fn store_uncompressed(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let n_blocks = src.len().div_ceil(MAX_STORED_BLOCK).max(1);
    let needed = src.len() + n_blocks * UNCOMPRESSED_HEADER_SIZE + ENDOFSTREAM_SIZE;
    if dst.len() < needed {
        return Err(OxiArcError::buffer_too_small(needed, dst.len()));
    }

    let mut pos = 0;
    let mut offset = 0;
    loop {
        let n = (src.len() - offset).min(MAX_STORED_BLOCK);
        dst[pos..pos + 4].copy_from_slice(&UNCOMPRESSED_BLOCK_MAGIC.to_le_bytes());
        dst[pos + 4..pos + 8].copy_from_slice(&(n as u32).to_le_bytes());
        pos += UNCOMPRESSED_HEADER_SIZE;
        dst[pos..pos + n].copy_from_slice(&src[offset..offset + n]);
        pos += n;
        offset += n;
        if offset == src.len() {
            break;
        }
    }
    dst[pos..pos + ENDOFSTREAM_SIZE].copy_from_slice(&ENDOFSTREAM_BLOCK_MAGIC.to_le_bytes());
    Ok(pos + ENDOFSTREAM_SIZE)
}

impl Compressor for LzfseEncoder {
    fn compress(&mut self, input: &[u8], output: &mut [u8]) -> Result<CompressStatus> {
        match self.encode(input, output) {
            Ok(_) => Ok(CompressStatus::Done),
            Err(OxiArcError::BufferTooSmall { .. }) => Ok(CompressStatus::NeedsOutput),
            Err(e) => Err(e),
        }
    }

    fn total_out(&self) -> usize {
        self.total_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress;

    fn text(len: usize, seed: u32) -> Vec<u8> {
        let words = [
            "lorem ", "ipsum ", "dolor ", "sit ", "amet ", "consectetur ", "adipiscing ", "elit ",
        ];
        let mut x = seed;
        let mut out = Vec::with_capacity(len + 16);
        while out.len() < len {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
            out.extend_from_slice(words[(x >> 16) as usize % words.len()].as_bytes());
        }
        out.truncate(len);
        out
    }

    #[test]
    fn test_store_uncompressed_layout() {
        let mut dst = [0u8; 32];
        let n = store_uncompressed(b"AAAA", &mut dst).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&dst[..n], b"bvx-\x04\0\0\0AAAAbvx$");

        let n = store_uncompressed(b"", &mut dst).unwrap();
        assert_eq!(&dst[..n], b"bvx-\0\0\0\0bvx$");

        assert!(matches!(
            store_uncompressed(&[0u8; 21], &mut dst),
            Err(OxiArcError::BufferTooSmall {
                needed: 33,
                available: 32
            })
        ));
    }

    #[test]
    fn test_small_inputs_are_stored() {
        let mut encoder = LzfseEncoder::new();
        let data = text(4095, 1);
        let mut dst = vec![0u8; 5000];
        let n = encoder.encode(&data, &mut dst).unwrap();
        assert_eq!(n, data.len() + 12);
        assert_eq!(&dst[..4], b"bvx-");

        let encoder_cfg = LzfseConfig::new().with_min_compress_size(0);
        let mut encoder = LzfseEncoder::with_config(encoder_cfg).unwrap();
        let n = encoder.encode(&data, &mut dst).unwrap();
        assert_eq!(&dst[..4], b"bvx2");
        assert!(n < data.len());
    }

    #[test]
    fn test_falls_back_when_compressed_does_not_fit() {
        // Incompressible input: the compressed stream is larger than the input.
        let mut x = 0x1234_5678u32;
        let data: Vec<u8> = (0..10_000)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        let mut dst = vec![0u8; data.len() + 12];
        let mut encoder = LzfseEncoder::new();
        let n = encoder.encode(&data, &mut dst).unwrap();
        assert_eq!(n, data.len() + 12);
        assert_eq!(&dst[..4], b"bvx-");
        assert_eq!(decompress(&dst[..n]).unwrap(), data);

        let mut tiny = vec![0u8; 100];
        assert!(encoder.encode(&data, &mut tiny).is_err());
    }

    #[test]
    fn test_chunked_translation_roundtrip() {
        let data = text(3 * CHUNK_SIZE + 12_345, 7);
        let mut encoder = LzfseEncoder::new();
        encoder.chunk_threshold = 0;
        let mut dst = vec![0u8; data.len()];
        let n = encoder.encode(&data, &mut dst).unwrap();
        assert_eq!(&dst[..4], b"bvx2");
        assert!(n < data.len() / 2);
        assert_eq!(decompress(&dst[..n]).unwrap(), data);
    }

    #[test]
    fn test_chunked_exact_multiple() {
        let data = text(2 * CHUNK_SIZE, 9);
        let mut encoder = LzfseEncoder::new();
        encoder.chunk_threshold = 0;
        let mut dst = vec![0u8; data.len()];
        let n = encoder.encode(&data, &mut dst).unwrap();
        assert_eq!(decompress(&dst[..n]).unwrap(), data);
    }

    #[test]
    fn test_translate_clamps_history() {
        let src = [0u8; 64];
        let mut history = vec![HistorySet::EMPTY; 4];
        history[1].pos = [100, 50, -1_048_540, 0];
        let (mut l, mut m, mut d) = (vec![0u32; 16], vec![0u32; 16], vec![0u32; 16]);
        let mut literals = vec![0u8; 64];
        let mut dst = [0u8; 16];
        let mut s = EncodeState {
            src: &src,
            base: 0,
            src_end: 64,
            src_literal: 40,
            src_encode_i: 56,
            pending: Match {
                pos: 45,
                ref_pos: 30,
                length: 5,
            },
            history: &mut history,
            hash_bits: 2,
            good_match_length: 40,
            matches_cap: 16,
            literals_cap: 64,
            n_matches: 0,
            n_literals: 0,
            l_values: &mut l,
            m_values: &mut m,
            d_values: &mut d,
            literals: &mut literals,
            dst: &mut dst,
            dst_pos: 0,
        };
        s.translate(32);
        assert_eq!(s.base, 32);
        assert_eq!((s.src_end, s.src_literal, s.src_encode_i), (32, 8, 24));
        assert_eq!((s.pending.pos, s.pending.ref_pos), (13, -2));
        assert_eq!(s.index(-2), 30);
        assert_eq!(
            s.history[1].pos,
            [68, 18, crate::frontend::INVALID_POSITION, -32]
        );
        assert_eq!(s.history[0], HistorySet::EMPTY);
    }

    #[test]
    fn test_compressor_trait() {
        let data = text(50_000, 3);
        let mut encoder = LzfseEncoder::new();
        let compressed = encoder.compress_all(&data).unwrap();
        assert_eq!(Compressor::total_out(&encoder), compressed.len());
        assert_eq!(decompress(&compressed).unwrap(), data);

        let mut small = vec![0u8; 10];
        assert_eq!(
            encoder.compress(&data, &mut small).unwrap(),
            CompressStatus::NeedsOutput
        );
    }

    #[test]
    fn test_scratch_size() {
        let config = LzfseConfig::DEFAULT;
        let size = LzfseEncoder::scratch_size_for(&config);
        assert!(size > 16384 * std::mem::size_of::<HistorySet>());
    }
}

//! Pure Rust LZFSE compression implementation.
//!
//! LZFSE combines an LZ77-style match finder with Finite State Entropy
//! coding of the literals and of the match descriptions. A stream is a
//! sequence of blocks terminated by an end-of-stream marker:
//!
//! - compressed blocks with a packed (V2) or verbose (V1) header,
//! - uncompressed blocks,
//! - LZVN blocks, which this crate decodes but does not produce.
//!
//! # Features
//!
//! - Bit-exact stream format, interoperable with other LZFSE implementations
//! - Resumable decoding: a call stopped by a full destination continues
//!   where it left off once the destination has grown
//! - Reusable encoder/decoder scratch memory
//! - Automatic uncompressed fallback for small or incompressible inputs
//!
//! # Example
//!
//! ```
//! use oxiarc_lzfse::{compress, decompress};
//!
//! let data = b"Hello, LZFSE! Hello, LZFSE! Hello, LZFSE!".repeat(100);
//! let compressed = compress(&data).unwrap();
//! assert!(compressed.len() < data.len());
//! assert_eq!(decompress(&compressed).unwrap(), data);
//! ```
//!
//! The buffer-level entry points report sizes the way C callers expect:
//!
//! ```
//! use oxiarc_lzfse::{decode_buffer, encode_buffer};
//!
//! let mut stream = [0u8; 64];
//! let n = encode_buffer(&mut stream, b"AAAA");
//! assert_eq!(&stream[..n], b"bvx-\x04\x00\x00\x00AAAAbvx$");
//!
//! let mut out = [0u8; 2];
//! // A full destination returns its capacity: grow and retry.
//! assert_eq!(decode_buffer(&mut out, &stream[..n]), 2);
//! ```

mod backend;
pub mod config;
mod decode;
mod encode;
pub mod format;
mod frontend;
pub mod fse;
pub mod header;
mod lmd;
pub mod lzvn;

pub use config::LzfseConfig;
pub use decode::LzfseDecoder;
pub use encode::LzfseEncoder;
pub use header::CompressedBlockHeader;

use lmd::LmdState;
use oxiarc_core::error::Result;
use oxiarc_core::traits::{Compressor, DecompressStatus, Decompressor};

/// Bytes of scratch memory held by a default-configured encoder.
pub fn encode_scratch_size() -> usize {
    LzfseEncoder::scratch_size_for(&LzfseConfig::DEFAULT)
}

/// Bytes of scratch memory held by a decoder.
pub fn decode_scratch_size() -> usize {
    std::mem::size_of::<LzfseDecoder>()
        + format::LITERALS_PER_BLOCK
        + 64
        + format::ENCODE_LITERAL_STATES * std::mem::size_of::<fse::DecoderEntry>()
        + std::mem::size_of::<LmdState>()
}

/// Encode `src` into `dst`, returning the stream size, or 0 if it does not
/// fit.
pub fn encode_buffer(dst: &mut [u8], src: &[u8]) -> usize {
    encode_buffer_with_scratch(dst, src, &mut LzfseEncoder::new())
}

/// [`encode_buffer`] reusing the scratch memory of `encoder`.
pub fn encode_buffer_with_scratch(dst: &mut [u8], src: &[u8], encoder: &mut LzfseEncoder) -> usize {
    encoder.encode(src, dst).unwrap_or(0)
}

/// Decode the stream in `src` into `dst`.
///
/// Returns the decoded size, `dst.len()` if the destination filled up before
/// the stream ended, or 0 if the stream is malformed or truncated.
pub fn decode_buffer(dst: &mut [u8], src: &[u8]) -> usize {
    decode_buffer_with_scratch(dst, src, &mut LzfseDecoder::new())
}

/// [`decode_buffer`] reusing the scratch memory of `decoder`.
pub fn decode_buffer_with_scratch(dst: &mut [u8], src: &[u8], decoder: &mut LzfseDecoder) -> usize {
    decoder.reset();
    match decoder.decode(src, dst) {
        Ok(DecompressStatus::Done) => decoder.total_out(),
        Ok(DecompressStatus::NeedsOutput) => dst.len(),
        Ok(DecompressStatus::NeedsInput) | Err(_) => 0,
    }
}

/// Compress `data` into a new LZFSE stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    LzfseEncoder::new().compress_all(data)
}

/// Decompress a complete LZFSE stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    LzfseDecoder::new().decompress_all(data)
}

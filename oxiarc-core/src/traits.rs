//! Core traits for buffer-oriented compression.
//!
//! Codecs in this workspace operate on caller-owned buffers. A call either
//! finishes, or stops with a recoverable status telling the caller which side
//! ran out. Malformed input is reported through [`crate::error::OxiArcError`].

use crate::error::{OxiArcError, Result};

/// Status of a decompression call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressStatus {
    /// The source ended before the stream did.
    NeedsInput,
    /// The destination is full; call again with a larger destination.
    NeedsOutput,
    /// The end-of-stream marker was reached.
    Done,
}

/// Status of a compression call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressStatus {
    /// The destination was too small for the encoded stream.
    NeedsOutput,
    /// The whole input was encoded.
    Done,
}

/// A resumable decompressor working over growable buffers.
///
/// Between calls the caller passes the same source (optionally extended) and
/// the same destination, optionally grown with its already decoded prefix
/// left untouched. The decompressor keeps its cursors as offsets into those
/// buffers, so decoding continues byte-for-byte where it stopped.
pub trait Decompressor {
    /// Decode as much of `input` into `output` as possible.
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressStatus>;

    /// Number of bytes written to the destination so far.
    fn total_out(&self) -> usize;

    /// Reset the decompressor to its initial state.
    fn reset(&mut self);

    /// Check if the decompressor has reached the end of the stream.
    fn is_finished(&self) -> bool;

    /// Decompress a complete stream, growing the output as needed.
    fn decompress_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; input.len().saturating_mul(4).max(1024)];

        loop {
            match self.decompress(input, &mut output)? {
                DecompressStatus::Done => {
                    output.truncate(self.total_out());
                    return Ok(output);
                }
                DecompressStatus::NeedsOutput => {
                    let grown = output.len().saturating_mul(2);
                    output.resize(grown, 0);
                }
                DecompressStatus::NeedsInput => {
                    return Err(OxiArcError::corrupted(
                        input.len() as u64,
                        "stream ended before the end-of-stream block",
                    ));
                }
            }
        }
    }
}

/// A one-shot compressor writing a complete stream into a caller buffer.
pub trait Compressor {
    /// Encode all of `input` into `output`.
    ///
    /// On [`CompressStatus::NeedsOutput`] nothing useful was written; the
    /// caller retries from scratch with a larger destination.
    fn compress(&mut self, input: &[u8], output: &mut [u8]) -> Result<CompressStatus>;

    /// Number of bytes written by the last successful call.
    fn total_out(&self) -> usize;

    /// Compress all data at once (convenience method).
    fn compress_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; input.len() + input.len() / 16 + 64];

        loop {
            match self.compress(input, &mut output)? {
                CompressStatus::Done => {
                    output.truncate(self.total_out());
                    return Ok(output);
                }
                CompressStatus::NeedsOutput => {
                    let grown = output.len().saturating_mul(2);
                    output.resize(grown, 0);
                }
            }
        }
    }
}

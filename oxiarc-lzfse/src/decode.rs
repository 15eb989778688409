//! Resumable LZFSE stream decoder.
//!
//! [`LzfseDecoder`] walks the block sequence of a stream. Its cursors are
//! offsets into the caller's source and destination buffers, so a call that
//! stops early (source truncated or destination full) can be repeated with
//! the same source, possibly extended, and the same destination, possibly
//! grown. Bytes already written must be left in place: they are the history
//! later matches copy from.

use crate::format::{
    COMPRESSEDLZVN_BLOCK_MAGIC, COMPRESSEDV1_BLOCK_MAGIC, COMPRESSEDV2_BLOCK_MAGIC, D_BASE_VALUE,
    D_EXTRA_BITS, ENCODE_D_STATES, ENCODE_L_STATES, ENCODE_LITERAL_STATES, ENCODE_M_STATES,
    ENDOFSTREAM_BLOCK_MAGIC, L_BASE_VALUE, L_EXTRA_BITS, LITERALS_PER_BLOCK, LZVN_HEADER_SIZE,
    M_BASE_VALUE, M_EXTRA_BITS, UNCOMPRESSED_BLOCK_MAGIC, UNCOMPRESSED_HEADER_SIZE,
};
use crate::fse::{DecoderEntry, decode, init_decoder_table, init_value_decoder_table};
use crate::header::{
    CompressedBlockHeader, V1_HEADER_SIZE, V2_FREQ_OFFSET, V2_MAX_HEADER_SIZE, load_u32,
};
use crate::lmd::{self, LmdState};
use crate::lzvn::{LzvnDecoder, LzvnStall};
use oxiarc_core::bitstream::InStream;
use oxiarc_core::error::{OxiArcError, Result};
use oxiarc_core::traits::{DecompressStatus, Decompressor};
use tracing::{debug, trace};

/// Slack after the last decoded literal.
const LITERAL_SLACK: usize = 64;

/// Block the decoder is inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Between blocks: the next source bytes are a magic.
    NoBlock,
    /// Stored block with `remaining` bytes left to copy.
    Uncompressed { remaining: usize },
    /// FSE block; the L/M/D state lives in [`LmdState`].
    Compressed,
    /// LZVN block with raw and payload byte budgets.
    Lzvn {
        n_raw: usize,
        n_payload: usize,
        decoder: LzvnDecoder,
    },
    /// The end-of-stream block was consumed.
    EndOfStream,
}

/// Resumable LZFSE decoder.
///
/// # Example
///
/// ```
/// use oxiarc_lzfse::{LzfseDecoder, encode_buffer};
/// use oxiarc_core::traits::DecompressStatus;
///
/// let data = b"the same words, the same words, the same words".repeat(200);
/// let mut compressed = vec![0u8; data.len()];
/// let n = encode_buffer(&mut compressed, &data);
/// assert!(n > 0);
///
/// let mut decoder = LzfseDecoder::new();
/// let mut out = vec![0u8; data.len()];
/// let status = decoder.decode(&compressed[..n], &mut out).unwrap();
/// assert_eq!(status, DecompressStatus::Done);
/// assert_eq!(decoder.total_out(), data.len());
/// assert_eq!(out, data);
/// ```
#[derive(Debug)]
pub struct LzfseDecoder {
    src_pos: usize,
    dst_pos: usize,
    block: BlockState,
    literals: Vec<u8>,
    literal_decoder: Vec<DecoderEntry>,
    lmd: Box<LmdState>,
}

impl Default for LzfseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzfseDecoder {
    /// Create a decoder positioned at the start of a stream.
    pub fn new() -> Self {
        Self {
            src_pos: 0,
            dst_pos: 0,
            block: BlockState::NoBlock,
            literals: vec![0u8; LITERALS_PER_BLOCK + LITERAL_SLACK],
            literal_decoder: vec![DecoderEntry::default(); ENCODE_LITERAL_STATES],
            lmd: Box::default(),
        }
    }

    /// Source bytes consumed so far.
    pub fn total_in(&self) -> usize {
        self.src_pos
    }

    /// Destination bytes produced so far.
    pub fn total_out(&self) -> usize {
        self.dst_pos
    }

    /// Whether the end-of-stream block has been reached.
    pub fn is_finished(&self) -> bool {
        self.block == BlockState::EndOfStream
    }

    /// Forget all progress and start over at a new stream.
    pub fn reset(&mut self) {
        self.src_pos = 0;
        self.dst_pos = 0;
        self.block = BlockState::NoBlock;
    }

    /// Decode `src` into `dst` until the stream ends or one side runs out.
    pub fn decode(&mut self, src: &[u8], dst: &mut [u8]) -> Result<DecompressStatus> {
        if dst.len() < self.dst_pos {
            return Err(OxiArcError::buffer_too_small(self.dst_pos, dst.len()));
        }
        if src.len() < self.src_pos {
            return Ok(DecompressStatus::NeedsInput);
        }

        loop {
            match self.block {
                BlockState::EndOfStream => return Ok(DecompressStatus::Done),
                BlockState::NoBlock => {
                    if let Some(status) = self.start_block(src)? {
                        return Ok(status);
                    }
                }
                BlockState::Uncompressed { remaining } => {
                    let n = remaining
                        .min(src.len() - self.src_pos)
                        .min(dst.len() - self.dst_pos);
                    dst[self.dst_pos..self.dst_pos + n]
                        .copy_from_slice(&src[self.src_pos..self.src_pos + n]);
                    self.src_pos += n;
                    self.dst_pos += n;
                    let remaining = remaining - n;
                    if remaining == 0 {
                        self.block = BlockState::NoBlock;
                        continue;
                    }
                    self.block = BlockState::Uncompressed { remaining };
                    return Ok(if self.src_pos == src.len() {
                        DecompressStatus::NeedsInput
                    } else {
                        DecompressStatus::NeedsOutput
                    });
                }
                BlockState::Compressed => {
                    let n_lmd = self.lmd.n_lmd_payload_bytes;
                    let Some(payload) = src.get(self.src_pos..self.src_pos + n_lmd) else {
                        return Ok(DecompressStatus::NeedsInput);
                    };
                    match lmd::execute(
                        &mut self.lmd,
                        &self.literals,
                        payload,
                        dst,
                        &mut self.dst_pos,
                    )? {
                        DecompressStatus::Done => {
                            self.src_pos += n_lmd;
                            self.block = BlockState::NoBlock;
                        }
                        status => return Ok(status),
                    }
                }
                BlockState::Lzvn {
                    n_raw,
                    n_payload,
                    mut decoder,
                } => {
                    if n_payload > 0 && self.src_pos >= src.len() {
                        return Ok(DecompressStatus::NeedsInput);
                    }
                    let src_end = src.len().min(self.src_pos + n_payload);
                    let dst_end = dst.len().min(self.dst_pos + n_raw);
                    let progress = decoder.decode(
                        &src[self.src_pos..src_end],
                        &mut dst[..dst_end],
                        self.dst_pos,
                    )?;
                    self.src_pos += progress.consumed;
                    self.dst_pos += progress.produced;
                    let n_raw = n_raw - progress.produced;
                    let n_payload = n_payload - progress.consumed;

                    if n_raw == 0 && n_payload == 0 && progress.end_of_stream {
                        self.block = BlockState::NoBlock;
                        continue;
                    }
                    let offset = self.src_pos as u64;
                    let mismatch = || {
                        OxiArcError::corrupted(offset, "LZVN block sizes do not match its payload")
                    };
                    if progress.end_of_stream {
                        return Err(mismatch());
                    }
                    self.block = BlockState::Lzvn {
                        n_raw,
                        n_payload,
                        decoder,
                    };
                    return match progress.stall {
                        // The end-of-stream opcode may still be missing once all
                        // raw bytes are out.
                        Some(LzvnStall::Source) if src_end < self.src_pos + n_payload => {
                            Ok(DecompressStatus::NeedsInput)
                        }
                        Some(LzvnStall::Destination) if n_raw > 0 => {
                            Ok(DecompressStatus::NeedsOutput)
                        }
                        Some(LzvnStall::Destination) => Err(mismatch()),
                        _ => Err(OxiArcError::corrupted(
                            offset,
                            "LZVN payload ended inside an opcode",
                        )),
                    };
                }
            }
        }
    }

    /// Read the next block header. Returns a status when the call must stop.
    fn start_block(&mut self, src: &[u8]) -> Result<Option<DecompressStatus>> {
        let start = self.src_pos;
        let Some(magic) = load_u32(src, start) else {
            return Ok(Some(DecompressStatus::NeedsInput));
        };

        match magic {
            ENDOFSTREAM_BLOCK_MAGIC => {
                trace!(offset = start, "end of stream");
                self.src_pos += 4;
                self.block = BlockState::EndOfStream;
                Ok(Some(DecompressStatus::Done))
            }
            UNCOMPRESSED_BLOCK_MAGIC => {
                let Some(n_raw) = load_u32(src, start + 4) else {
                    return Ok(Some(DecompressStatus::NeedsInput));
                };
                trace!(offset = start, n_raw, "uncompressed block");
                self.src_pos += UNCOMPRESSED_HEADER_SIZE;
                self.block = BlockState::Uncompressed {
                    remaining: n_raw as usize,
                };
                Ok(None)
            }
            COMPRESSEDLZVN_BLOCK_MAGIC => {
                let (Some(n_raw), Some(n_payload)) =
                    (load_u32(src, start + 4), load_u32(src, start + 8))
                else {
                    return Ok(Some(DecompressStatus::NeedsInput));
                };
                trace!(offset = start, n_raw, n_payload, "LZVN block");
                self.src_pos += LZVN_HEADER_SIZE;
                self.block = BlockState::Lzvn {
                    n_raw: n_raw as usize,
                    n_payload: n_payload as usize,
                    decoder: LzvnDecoder::new(),
                };
                Ok(None)
            }
            COMPRESSEDV1_BLOCK_MAGIC | COMPRESSEDV2_BLOCK_MAGIC => {
                let block = &src[start..];
                let (header, header_size) = if magic == COMPRESSEDV1_BLOCK_MAGIC {
                    if block.len() < V1_HEADER_SIZE {
                        return Ok(Some(DecompressStatus::NeedsInput));
                    }
                    (CompressedBlockHeader::read_v1(block)?, V1_HEADER_SIZE)
                } else {
                    let Some(header_size) = CompressedBlockHeader::v2_header_size(block) else {
                        return Ok(Some(DecompressStatus::NeedsInput));
                    };
                    // Out-of-range sizes are rejected by the parser.
                    if (V2_FREQ_OFFSET..=V2_MAX_HEADER_SIZE).contains(&header_size)
                        && block.len() < header_size
                    {
                        return Ok(Some(DecompressStatus::NeedsInput));
                    }
                    (CompressedBlockHeader::unpack_v2(block)?, header_size)
                };

                let n_literal_payload = header.n_literal_payload_bytes as usize;
                let n_lmd_payload = header.n_lmd_payload_bytes as usize;
                if block.len() < header_size + n_literal_payload + n_lmd_payload {
                    return Ok(Some(DecompressStatus::NeedsInput));
                }
                header.check()?;
                debug!(
                    offset = start,
                    n_raw = header.n_raw_bytes,
                    n_literals = header.n_literals,
                    n_matches = header.n_matches,
                    "compressed block"
                );

                self.decode_literals(src, start, header_size, &header)?;
                self.prepare_lmd(src, start + header_size + n_literal_payload, &header)?;
                self.src_pos = start + header_size + n_literal_payload;
                self.block = BlockState::Compressed;
                Ok(None)
            }
            _ => {
                debug!(offset = start, magic, "unknown block magic");
                Err(OxiArcError::invalid_magic(magic, start as u64))
            }
        }
    }

    /// Decode all literals of the block at `block_start` into `self.literals`.
    fn decode_literals(
        &mut self,
        src: &[u8],
        block_start: usize,
        header_size: usize,
        header: &CompressedBlockHeader,
    ) -> Result<()> {
        init_decoder_table(
            ENCODE_LITERAL_STATES as u32,
            &header.literal_freq,
            &mut self.literal_decoder,
        )?;

        // The first load of a short payload may dip into the header.
        let mut pos = block_start + header_size + header.n_literal_payload_bytes as usize;
        let mut input = InStream::new(header.literal_bits, src, &mut pos, block_start)?;
        let mut states = header.literal_state;
        let table = &self.literal_decoder;
        for group in self.literals[..header.n_literals as usize].chunks_exact_mut(4) {
            input.flush(src, &mut pos, block_start)?;
            for (lit, state) in group.iter_mut().zip(states.iter_mut()) {
                *lit = decode(state, table, &mut input);
            }
        }
        Ok(())
    }

    /// Build the L/M/D tables and position the L/M/D reader.
    fn prepare_lmd(
        &mut self,
        src: &[u8],
        payload_start: usize,
        header: &CompressedBlockHeader,
    ) -> Result<()> {
        let n_lmd_payload = header.n_lmd_payload_bytes as usize;
        let payload = &src[payload_start..payload_start + n_lmd_payload];
        let bs = &mut *self.lmd;
        init_value_decoder_table(
            "L",
            ENCODE_L_STATES as u32,
            &header.l_freq,
            &L_EXTRA_BITS,
            &L_BASE_VALUE,
            &mut bs.l_decoder,
        )?;
        init_value_decoder_table(
            "M",
            ENCODE_M_STATES as u32,
            &header.m_freq,
            &M_EXTRA_BITS,
            &M_BASE_VALUE,
            &mut bs.m_decoder,
        )?;
        init_value_decoder_table(
            "D",
            ENCODE_D_STATES as u32,
            &header.d_freq,
            &D_EXTRA_BITS,
            &D_BASE_VALUE,
            &mut bs.d_decoder,
        )?;

        let mut pos = n_lmd_payload;
        let input = InStream::new(header.lmd_bits, payload, &mut pos, 0)?;
        bs.start(
            header.n_matches,
            n_lmd_payload,
            input,
            pos,
            (header.l_state, header.m_state, header.d_state),
        );
        Ok(())
    }
}

impl Decompressor for LzfseDecoder {
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressStatus> {
        self.decode(input, output)
    }

    fn total_out(&self) -> usize {
        self.dst_pos
    }

    fn reset(&mut self) {
        LzfseDecoder::reset(self);
    }

    fn is_finished(&self) -> bool {
        LzfseDecoder::is_finished(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_buffer;

    fn stored(data: &[u8]) -> Vec<u8> {
        let mut v = b"bvx-".to_vec();
        v.extend_from_slice(&(data.len() as u32).to_le_bytes());
        v.extend_from_slice(data);
        v.extend_from_slice(b"bvx$");
        v
    }

    fn compressible(len: usize) -> Vec<u8> {
        let words = ["alpha ", "beta ", "gamma ", "delta ", "epsilon "];
        let mut out = Vec::with_capacity(len);
        let mut i = 0usize;
        while out.len() < len {
            out.extend_from_slice(words[(i * 7 + i / 3) % words.len()].as_bytes());
            i += 1;
        }
        out.truncate(len);
        out
    }

    /// Rewrite every V2 block of `stream` in the V1 layout.
    fn to_v1(stream: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut pos = 0;
        loop {
            let magic = load_u32(stream, pos).unwrap();
            match magic {
                COMPRESSEDV2_BLOCK_MAGIC => {
                    let size = CompressedBlockHeader::v2_header_size(&stream[pos..]).unwrap();
                    let header = CompressedBlockHeader::unpack_v2(&stream[pos..]).unwrap();
                    let mut v1 = vec![0u8; V1_HEADER_SIZE];
                    header.write_v1(&mut v1).unwrap();
                    out.extend_from_slice(&v1);
                    let payload = header.n_payload_bytes as usize;
                    out.extend_from_slice(&stream[pos + size..pos + size + payload]);
                    pos += size + payload;
                }
                ENDOFSTREAM_BLOCK_MAGIC => {
                    out.extend_from_slice(&stream[pos..pos + 4]);
                    return out;
                }
                _ => panic!("unexpected block {magic:#x}"),
            }
        }
    }

    #[test]
    fn test_uncompressed_block() {
        let stream = stored(b"hello world");
        let mut decoder = LzfseDecoder::new();
        let mut out = [0u8; 32];
        assert_eq!(decoder.decode(&stream, &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(&out[..decoder.total_out()], b"hello world");
        assert_eq!(decoder.total_in(), stream.len());
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_uncompressed_block_resumes() {
        let stream = stored(b"0123456789");
        let mut decoder = LzfseDecoder::new();
        let mut out = vec![0u8; 4];
        assert_eq!(
            decoder.decode(&stream, &mut out).unwrap(),
            DecompressStatus::NeedsOutput
        );
        assert_eq!(decoder.total_out(), 4);
        out.resize(16, 0);
        assert_eq!(decoder.decode(&stream, &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(&out[..10], b"0123456789");
    }

    #[test]
    fn test_empty_stream() {
        let mut decoder = LzfseDecoder::new();
        let mut out = [0u8; 0];
        assert_eq!(decoder.decode(b"bvx$", &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(decoder.total_out(), 0);
    }

    #[test]
    fn test_compressed_v2_and_v1() {
        let data = compressible(20_000);
        let mut compressed = vec![0u8; data.len()];
        let n = encode_buffer(&mut compressed, &data);
        assert!(n > 0 && n < data.len() / 2);
        assert_eq!(&compressed[..4], b"bvx2");

        let mut out = vec![0u8; data.len()];
        let mut decoder = LzfseDecoder::new();
        assert_eq!(
            decoder.decode(&compressed[..n], &mut out).unwrap(),
            DecompressStatus::Done
        );
        assert_eq!(out, data);

        let v1 = to_v1(&compressed[..n]);
        assert_eq!(&v1[..4], b"bvx1");
        let mut out = vec![0u8; data.len()];
        let mut decoder = LzfseDecoder::new();
        assert_eq!(decoder.decode(&v1, &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(out, data);
    }

    #[test]
    fn test_lzvn_block() {
        // Literals "abcd", then 7 bytes at distance 4, then end of stream.
        let payload = [0xe4, b'a', b'b', b'c', b'd', 0xf7, 0x06, 0, 0, 0, 0, 0, 0, 0];
        let mut stream = b"bvxn".to_vec();
        stream.extend_from_slice(&11u32.to_le_bytes());
        stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(b"bvx$");

        // Set the distance with an sml_d opcode first: L=0, M=3, D=4.
        let payload = [
            0xe4, b'a', b'b', b'c', b'd', 0x00, 0x04, 0xf4, 0x06, 0, 0, 0, 0, 0, 0, 0,
        ];
        let mut stream2 = b"bvxn".to_vec();
        stream2.extend_from_slice(&11u32.to_le_bytes());
        stream2.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream2.extend_from_slice(&payload);
        stream2.extend_from_slice(b"bvx$");

        // A match before any distance is invalid.
        let mut out = [0u8; 16];
        assert!(LzfseDecoder::new().decode(&stream, &mut out).is_err());

        let mut decoder = LzfseDecoder::new();
        assert_eq!(decoder.decode(&stream2, &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(&out[..decoder.total_out()], b"abcdabcdabc");
    }

    #[test]
    fn test_lzvn_size_mismatch() {
        let payload = [0xe2, b'h', b'i', 0x06, 0, 0, 0, 0, 0, 0, 0];
        let mut stream = b"bvxn".to_vec();
        stream.extend_from_slice(&5u32.to_le_bytes());
        stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(b"bvx$");
        let mut out = [0u8; 16];
        assert!(LzfseDecoder::new().decode(&stream, &mut out).is_err());
    }

    #[test]
    fn test_lzvn_truncated_needs_input() {
        let stream = include_bytes!("../tests/data/records.lzfse");
        let expected = include_bytes!("../tests/data/records.txt");
        let mut out = vec![0u8; expected.len()];
        for cut in 0..stream.len() {
            let mut decoder = LzfseDecoder::new();
            assert_eq!(
                decoder.decode(&stream[..cut], &mut out).unwrap(),
                DecompressStatus::NeedsInput,
                "cut at {cut}"
            );
            assert_eq!(decoder.decode(stream, &mut out).unwrap(), DecompressStatus::Done);
            assert_eq!(&out, expected);
        }
    }

    #[test]
    fn test_invalid_magic() {
        let mut out = [0u8; 16];
        let err = LzfseDecoder::new().decode(b"bvx3\0\0\0\0", &mut out).unwrap_err();
        assert!(matches!(err, OxiArcError::InvalidMagic { offset: 0, .. }));
    }

    #[test]
    fn test_truncated_needs_input() {
        let stream = stored(b"some bytes");
        let mut out = [0u8; 32];
        for cut in 0..stream.len() {
            let mut decoder = LzfseDecoder::new();
            assert_eq!(
                decoder.decode(&stream[..cut], &mut out).unwrap(),
                DecompressStatus::NeedsInput,
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_resume_after_more_input() {
        let stream = stored(b"resumable");
        let mut out = [0u8; 32];
        let mut decoder = LzfseDecoder::new();
        assert_eq!(
            decoder.decode(&stream[..12], &mut out).unwrap(),
            DecompressStatus::NeedsInput
        );
        assert_eq!(decoder.decode(&stream, &mut out).unwrap(), DecompressStatus::Done);
        assert_eq!(&out[..decoder.total_out()], b"resumable");
    }

    #[test]
    fn test_reset() {
        let stream = stored(b"abc");
        let mut out = [0u8; 8];
        let mut decoder = LzfseDecoder::new();
        decoder.decode(&stream, &mut out).unwrap();
        assert!(decoder.is_finished());
        decoder.reset();
        assert!(!decoder.is_finished());
        assert_eq!(decoder.total_out(), 0);
        assert_eq!(decoder.decode(&stream, &mut out).unwrap(), DecompressStatus::Done);
    }

    #[test]
    fn test_shrunk_destination_is_an_error() {
        let stream = stored(b"abcdef");
        let mut out = vec![0u8; 3];
        let mut decoder = LzfseDecoder::new();
        decoder.decode(&stream, &mut out).unwrap();
        let mut smaller = [0u8; 1];
        assert!(decoder.decode(&stream, &mut smaller).is_err());
    }
}

//! Encoder back end: collects L/M/D triplets and literals, and turns them
//! into compressed blocks.
//!
//! The front end hands over matches through [`EncodeState::backend_match`]
//! and [`EncodeState::backend_literals`]. Triplets accumulate in the block
//! buffers until they are full, at which point the block is entropy coded
//! into the destination and the buffers are emptied.
//!
//! Every operation either succeeds or fails with [`Full`] and leaves the
//! state as it was, so the caller can still fall back to storing the input.

use crate::format::{
    D_BASE_VALUE, D_EXTRA_BITS, ENCODE_D_STATES, ENCODE_D_SYMBOLS, ENCODE_L_STATES,
    ENCODE_L_SYMBOLS, ENCODE_LITERAL_STATES, ENCODE_LITERAL_SYMBOLS, ENCODE_M_STATES,
    ENCODE_M_SYMBOLS, ENCODE_MAX_L_VALUE, ENCODE_MAX_M_VALUE, ENDOFSTREAM_BLOCK_MAGIC,
    ENDOFSTREAM_SIZE, L_BASE_VALUE, L_EXTRA_BITS, M_BASE_VALUE, M_EXTRA_BITS, d_symbol, l_symbol,
    m_symbol,
};
use crate::frontend::{HistorySet, Match};
use crate::fse::{EncoderEntry, encode, init_encoder_table, normalize_freq};
use crate::header::{CompressedBlockHeader, V2_FREQ_OFFSET, V2_MAX_HEADER_SIZE};
use oxiarc_core::bitstream::OutStream;
use tracing::{debug, trace};

/// The destination or a block buffer has no room left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Full;

/// Outcome of an encoder step.
pub(crate) type Step = std::result::Result<(), Full>;

/// Free triplet slots kept in reserve by [`EncodeState::push_lmd`].
const MATCH_MARGIN: usize = 8;
/// Free literal bytes kept in reserve by [`EncodeState::push_lmd`].
const LITERAL_MARGIN: usize = 16;
/// Destination room required per group of literals or per triplet.
const PAYLOAD_MARGIN: usize = 16;
/// Zero bytes at the start of the L/M/D payload.
const LMD_PADDING: usize = 8;

/// State of one encoding call.
///
/// Source positions are signed offsets relative to `src[base]`; after a
/// chunk translation the history may point before `base`.
pub(crate) struct EncodeState<'a> {
    pub src: &'a [u8],
    pub base: usize,
    pub src_end: i64,
    pub src_literal: i64,
    pub src_encode_i: i64,
    pub pending: Match,
    pub history: &'a mut [HistorySet],
    pub hash_bits: u32,
    pub good_match_length: u32,

    pub matches_cap: usize,
    pub literals_cap: usize,
    pub n_matches: usize,
    pub n_literals: usize,
    pub l_values: &'a mut [u32],
    pub m_values: &'a mut [u32],
    pub d_values: &'a mut [u32],
    pub literals: &'a mut [u8],

    pub dst: &'a mut [u8],
    pub dst_pos: usize,
}

impl EncodeState<'_> {
    /// Index into `src` of source position `pos`.
    #[inline]
    pub fn index(&self, pos: i64) -> usize {
        (self.base as i64 + pos) as usize
    }

    /// Append one triplet and its literals.
    fn push_lmd(&mut self, l: u32, m: u32, d: u32) -> Step {
        let l_len = l as usize;
        if self.n_matches + 1 + MATCH_MARGIN > self.matches_cap
            || self.n_literals + l_len + LITERAL_MARGIN > self.literals_cap
        {
            return Err(Full);
        }

        let n = self.n_matches;
        self.l_values[n] = l;
        self.m_values[n] = m;
        self.d_values[n] = d;
        self.n_matches += 1;

        let from = self.index(self.src_literal);
        self.literals[self.n_literals..self.n_literals + l_len]
            .copy_from_slice(&self.src[from..from + l_len]);
        self.n_literals += l_len;
        self.src_literal += i64::from(l) + i64::from(m);
        Ok(())
    }

    /// Split a match into triplets within the L and M limits and push them.
    ///
    /// All or nothing: on failure the block buffers are restored.
    fn push_match(&mut self, m: Match) -> Step {
        let n_matches0 = self.n_matches;
        let n_literals0 = self.n_literals;
        let src_literal0 = self.src_literal;

        let result = self.push_split(m);
        if result.is_err() {
            self.n_matches = n_matches0;
            self.n_literals = n_literals0;
            self.src_literal = src_literal0;
        }
        result
    }

    fn push_split(&mut self, m: Match) -> Step {
        let mut l = (m.pos - self.src_literal) as u32;
        let mut len = m.length;
        let d = (m.pos - m.ref_pos) as u32;

        // Literal-only triplets carry D=1, the most frequent distance.
        while l > ENCODE_MAX_L_VALUE {
            self.push_lmd(ENCODE_MAX_L_VALUE, 0, 1)?;
            l -= ENCODE_MAX_L_VALUE;
        }
        while len > ENCODE_MAX_M_VALUE {
            self.push_lmd(l, ENCODE_MAX_M_VALUE, d)?;
            l = 0;
            len -= ENCODE_MAX_M_VALUE;
        }
        if l > 0 || len > 0 {
            self.push_lmd(l, len, d)?;
        }
        Ok(())
    }

    /// Add a match, emitting the current block first if it is full.
    pub fn backend_match(&mut self, m: Match) -> Step {
        if self.push_match(m).is_ok() {
            return Ok(());
        }
        self.encode_matches()?;
        self.push_match(m)
    }

    /// Add `l` literals, as a match of length zero.
    pub fn backend_literals(&mut self, l: i64) -> Step {
        let pos = self.src_literal + l;
        self.backend_match(Match {
            pos,
            ref_pos: pos - 1,
            length: 0,
        })
    }

    /// Emit the pending block, then the end-of-stream block.
    pub fn backend_end_of_stream(&mut self) -> Step {
        self.encode_matches()?;
        let end = self.dst_pos + ENDOFSTREAM_SIZE;
        let slot = self.dst.get_mut(self.dst_pos..end).ok_or(Full)?;
        slot.copy_from_slice(&ENDOFSTREAM_BLOCK_MAGIC.to_le_bytes());
        self.dst_pos = end;
        Ok(())
    }

    /// Entropy code the buffered triplets and literals into a V2 block.
    ///
    /// On [`Full`] the buffers are left as they were and `dst_pos` is not
    /// advanced.
    pub fn encode_matches(&mut self) -> Step {
        if self.n_literals == 0 && self.n_matches == 0 {
            return Ok(());
        }
        let n_literals0 = self.n_literals;
        let dst_pos0 = self.dst_pos;

        // Four interleaved literal streams.
        while self.n_literals % 4 != 0 {
            self.literals[self.n_literals] = 0;
            self.n_literals += 1;
        }

        // A repeated distance is coded as 0.
        let mut d_prev = 0;
        for d in &mut self.d_values[..self.n_matches] {
            if *d == d_prev {
                *d = 0;
            } else {
                d_prev = *d;
            }
        }

        let result = self.write_block();
        if result.is_err() {
            let mut d_prev = 0;
            for d in &mut self.d_values[..self.n_matches] {
                if *d == 0 {
                    *d = d_prev;
                } else {
                    d_prev = *d;
                }
            }
            self.n_literals = n_literals0;
            self.dst_pos = dst_pos0;
            trace!(dst_pos = dst_pos0, "destination full while emitting block");
        }
        result
    }

    fn write_block(&mut self) -> Step {
        let n_matches = self.n_matches;
        let n_literals = self.n_literals;
        let l_values = &self.l_values[..n_matches];
        let m_values = &self.m_values[..n_matches];
        let d_values = &self.d_values[..n_matches];
        let literals = &self.literals[..n_literals];

        let mut l_occ = [0u32; ENCODE_L_SYMBOLS];
        let mut m_occ = [0u32; ENCODE_M_SYMBOLS];
        let mut d_occ = [0u32; ENCODE_D_SYMBOLS];
        let mut literal_occ = [0u32; ENCODE_LITERAL_SYMBOLS];
        let mut n_raw_bytes = 0u32;
        for ((&l, &m), &d) in l_values.iter().zip(m_values).zip(d_values) {
            n_raw_bytes += l + m;
            l_occ[l_symbol(l)] += 1;
            m_occ[m_symbol(m)] += 1;
            d_occ[d_symbol(d)] += 1;
        }
        for &b in literals {
            literal_occ[usize::from(b)] += 1;
        }

        let block_start = self.dst_pos;
        let dst_end = self.dst.len();
        if block_start + V2_MAX_HEADER_SIZE > dst_end {
            return Err(Full);
        }

        let mut header = CompressedBlockHeader {
            n_raw_bytes,
            n_literals: n_literals as u32,
            n_matches: n_matches as u32,
            ..CompressedBlockHeader::default()
        };
        normalize_freq(ENCODE_L_STATES as u32, &l_occ, &mut header.l_freq);
        normalize_freq(ENCODE_M_STATES as u32, &m_occ, &mut header.m_freq);
        normalize_freq(ENCODE_D_STATES as u32, &d_occ, &mut header.d_freq);
        normalize_freq(
            ENCODE_LITERAL_STATES as u32,
            &literal_occ,
            &mut header.literal_freq,
        );
        let freq_len = header
            .encode_freq_tables(&mut self.dst[block_start + V2_FREQ_OFFSET..])
            .map_err(|_| Full)?;
        let header_size = V2_FREQ_OFFSET + freq_len;

        let mut l_encoder = [EncoderEntry::default(); ENCODE_L_SYMBOLS];
        let mut m_encoder = [EncoderEntry::default(); ENCODE_M_SYMBOLS];
        let mut d_encoder = [EncoderEntry::default(); ENCODE_D_SYMBOLS];
        let mut literal_encoder = [EncoderEntry::default(); ENCODE_LITERAL_SYMBOLS];
        init_encoder_table(ENCODE_L_STATES as u32, &header.l_freq, &mut l_encoder);
        init_encoder_table(ENCODE_M_STATES as u32, &header.m_freq, &mut m_encoder);
        init_encoder_table(ENCODE_D_STATES as u32, &header.d_freq, &mut d_encoder);
        init_encoder_table(
            ENCODE_LITERAL_STATES as u32,
            &header.literal_freq,
            &mut literal_encoder,
        );

        let dst = &mut *self.dst;
        let mut pos = block_start + header_size;

        // Literals, last to first so the decoder reads them in order.
        let literal_start = pos;
        let mut out = OutStream::new();
        let mut states = [0u16; 4];
        for group in literals.chunks_exact(4).rev() {
            if pos + PAYLOAD_MARGIN > dst_end {
                return Err(Full);
            }
            for (state, &b) in states.iter_mut().zip(group).rev() {
                encode(state, &literal_encoder, &mut out, usize::from(b));
            }
            out.flush(dst, &mut pos).map_err(|_| Full)?;
        }
        header.literal_bits = out.finish(dst, &mut pos).map_err(|_| Full)?;
        header.n_literal_payload_bytes = (pos - literal_start) as u32;
        header.literal_state = states;

        // L/M/D triplets, last to first.
        let lmd_start = pos;
        if pos + LMD_PADDING > dst_end {
            return Err(Full);
        }
        dst[pos..pos + LMD_PADDING].fill(0);
        pos += LMD_PADDING;

        let mut out = OutStream::new();
        let (mut l_state, mut m_state, mut d_state) = (0u16, 0u16, 0u16);
        for ((&l, &m), &d) in l_values.iter().zip(m_values).zip(d_values).rev() {
            if pos + PAYLOAD_MARGIN > dst_end {
                return Err(Full);
            }
            let s = d_symbol(d);
            out.push(u64::from(d - D_BASE_VALUE[s] as u32), u32::from(D_EXTRA_BITS[s]));
            encode(&mut d_state, &d_encoder, &mut out, s);

            let s = m_symbol(m);
            out.push(u64::from(m - M_BASE_VALUE[s] as u32), u32::from(M_EXTRA_BITS[s]));
            encode(&mut m_state, &m_encoder, &mut out, s);

            let s = l_symbol(l);
            out.push(u64::from(l - L_BASE_VALUE[s] as u32), u32::from(L_EXTRA_BITS[s]));
            encode(&mut l_state, &l_encoder, &mut out, s);

            out.flush(dst, &mut pos).map_err(|_| Full)?;
        }
        header.lmd_bits = out.finish(dst, &mut pos).map_err(|_| Full)?;
        header.n_lmd_payload_bytes = (pos - lmd_start) as u32;
        header.l_state = l_state;
        header.m_state = m_state;
        header.d_state = d_state;
        header.n_payload_bytes = header.n_literal_payload_bytes + header.n_lmd_payload_bytes;

        header
            .write_v2_fixed(header_size, &mut dst[block_start..])
            .map_err(|_| Full)?;

        debug!(
            n_matches,
            n_literals,
            n_raw_bytes,
            header_size,
            literal_payload = header.n_literal_payload_bytes,
            lmd_payload = header.n_lmd_payload_bytes,
            "emitted compressed block"
        );
        self.dst_pos = pos;
        self.n_literals = 0;
        self.n_matches = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::LzfseDecoder;
    use crate::frontend::INVALID_POSITION;
    use oxiarc_core::traits::DecompressStatus;

    struct Scratch {
        history: Vec<HistorySet>,
        l: Vec<u32>,
        m: Vec<u32>,
        d: Vec<u32>,
        literals: Vec<u8>,
    }

    impl Scratch {
        fn new(matches: usize) -> Self {
            Self {
                history: vec![HistorySet::EMPTY; 1 << 10],
                l: vec![0; matches],
                m: vec![0; matches],
                d: vec![0; matches],
                literals: vec![0; 4 * matches],
            }
        }

        fn state<'a>(&'a mut self, src: &'a [u8], dst: &'a mut [u8]) -> EncodeState<'a> {
            EncodeState {
                src,
                base: 0,
                src_end: src.len() as i64,
                src_literal: 0,
                src_encode_i: 0,
                pending: Match::NONE,
                history: &mut self.history,
                hash_bits: 10,
                good_match_length: 40,
                matches_cap: self.l.len(),
                literals_cap: self.literals.len(),
                n_matches: 0,
                n_literals: 0,
                l_values: &mut self.l,
                m_values: &mut self.m,
                d_values: &mut self.d,
                literals: &mut self.literals,
                dst,
                dst_pos: 0,
            }
        }
    }

    fn decode_all(stream: &[u8], len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut decoder = LzfseDecoder::new();
        assert_eq!(decoder.decode(stream, &mut out).unwrap(), DecompressStatus::Done);
        out.truncate(decoder.total_out());
        out
    }

    #[test]
    fn test_hand_fed_matches() {
        let src = b"abcdefgh_abcdefgh_abcdefgh".to_vec();
        let mut scratch = Scratch::new(1024);
        let mut dst = vec![0u8; 2048];
        let mut s = scratch.state(&src, &mut dst);

        s.backend_match(Match {
            pos: 9,
            ref_pos: 0,
            length: 17,
        })
        .unwrap();
        assert_eq!(s.n_matches, 1);
        assert_eq!(s.n_literals, 9);
        assert_eq!(s.src_literal, 26);
        s.backend_end_of_stream().unwrap();
        let n = s.dst_pos;

        assert_eq!(&dst[..4], b"bvx2");
        assert_eq!(&dst[n - 4..n], b"bvx$");
        assert_eq!(decode_all(&dst[..n], 64), src);
    }

    #[test]
    fn test_long_literal_and_match_runs_split() {
        let mut src: Vec<u8> = (0..700u32).map(|i| (i * 31 % 251) as u8).collect();
        let tail: Vec<u8> = src.iter().cycle().take(5000).copied().collect();
        src.extend_from_slice(&tail);

        let mut scratch = Scratch::new(1024);
        let mut dst = vec![0u8; 8192];
        let mut s = scratch.state(&src, &mut dst);
        // 700 literals (3 triplets) then a 5000-byte match at distance 700 (3 more).
        s.backend_match(Match {
            pos: 700,
            ref_pos: 0,
            length: 5000,
        })
        .unwrap();
        assert_eq!(s.n_matches, 5);
        assert_eq!(&s.l_values[..5], &[315, 315, 70, 0, 0]);
        assert_eq!(&s.m_values[..5], &[0, 0, 2359, 2359, 282]);
        assert_eq!(&s.d_values[..5], &[1, 1, 700, 700, 700]);
        s.backend_end_of_stream().unwrap();
        let n = s.dst_pos;
        assert_eq!(decode_all(&dst[..n], src.len()), src);
    }

    #[test]
    fn test_rollback_when_destination_full() {
        let src: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut scratch = Scratch::new(1024);
        let mut dst = vec![0u8; 100];
        let mut s = scratch.state(&src, &mut dst);
        s.backend_literals(3000).unwrap();
        let n_matches = s.n_matches;
        let n_literals = s.n_literals;
        let d_values: Vec<u32> = s.d_values[..n_matches].to_vec();

        assert_eq!(s.encode_matches(), Err(Full));
        assert_eq!(s.dst_pos, 0);
        assert_eq!(s.n_matches, n_matches);
        assert_eq!(s.n_literals, n_literals);
        assert_eq!(&s.d_values[..n_matches], &d_values[..]);
    }

    #[test]
    fn test_full_block_buffers_flush_and_retry() {
        let src: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        let mut scratch = Scratch::new(1024);
        let mut dst = vec![0u8; 64 * 1024];
        let mut s = scratch.state(&src, &mut dst);
        // 1024 matches do not fit a 1024-slot block with its reserve.
        for k in 0..1024i64 {
            let pos = 97 + k * 19;
            s.backend_match(Match {
                pos,
                ref_pos: pos - 97,
                length: 15,
            })
            .unwrap();
        }
        assert!(s.dst_pos > 0, "a block was emitted");
        assert!(s.n_matches < 1024);
        let l = s.src_end - s.src_literal;
        s.backend_literals(l).unwrap();
        s.backend_end_of_stream().unwrap();
        let n = s.dst_pos;
        assert_eq!(decode_all(&dst[..n], src.len()), src);
    }

    #[test]
    fn test_invalid_position_sentinel() {
        assert_eq!(INVALID_POSITION, -4 * 262_139);
    }
}

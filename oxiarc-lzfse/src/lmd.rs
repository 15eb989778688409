//! Execution of the L/M/D triplets of a compressed block.
//!
//! Each triplet copies L literals from the decoded literal buffer, then M
//! bytes from D bytes back in the output. The loop can stop at any byte when
//! the destination fills up; the partially executed triplet and all coder
//! state are saved in [`LmdState`] and the next call resumes from there.

use crate::format::{ENCODE_D_STATES, ENCODE_L_STATES, ENCODE_M_STATES};
use crate::fse::{ValueDecoderEntry, value_decode};
use oxiarc_core::bitstream::InStream;
use oxiarc_core::error::{OxiArcError, Result};
use oxiarc_core::traits::DecompressStatus;

/// Room beyond L + M under which the loop switches to exact copies.
const FAST_PATH_MARGIN: usize = 32;

/// Distance before any triplet of the block has set one.
const NO_DISTANCE: usize = usize::MAX;

/// Decoder state of the compressed block in progress.
#[derive(Debug, Clone)]
pub(crate) struct LmdState {
    /// Triplets not yet decoded.
    pub n_matches: u32,
    /// Size of the L/M/D payload.
    pub n_lmd_payload_bytes: usize,
    /// Next literal to copy.
    pub current_literal: usize,
    /// Literal bytes still to copy from the current triplet.
    pub l_value: usize,
    /// Match bytes still to copy from the current triplet.
    pub m_value: usize,
    /// Distance of the current triplet.
    pub d_value: usize,
    /// L/M/D bit reader.
    pub lmd_in_stream: InStream,
    /// Read position of the bit reader within the L/M/D payload.
    pub lmd_in_pos: usize,
    pub l_state: u16,
    pub m_state: u16,
    pub d_state: u16,
    pub l_decoder: [ValueDecoderEntry; ENCODE_L_STATES],
    pub m_decoder: [ValueDecoderEntry; ENCODE_M_STATES],
    pub d_decoder: [ValueDecoderEntry; ENCODE_D_STATES],
}

impl Default for LmdState {
    fn default() -> Self {
        Self {
            n_matches: 0,
            n_lmd_payload_bytes: 0,
            current_literal: 0,
            l_value: 0,
            m_value: 0,
            d_value: NO_DISTANCE,
            lmd_in_stream: InStream::default(),
            lmd_in_pos: 0,
            l_state: 0,
            m_state: 0,
            d_state: 0,
            l_decoder: [ValueDecoderEntry::default(); ENCODE_L_STATES],
            m_decoder: [ValueDecoderEntry::default(); ENCODE_M_STATES],
            d_decoder: [ValueDecoderEntry::default(); ENCODE_D_STATES],
        }
    }
}

impl LmdState {
    /// Prepare for a new block whose tables are already built.
    pub fn start(
        &mut self,
        n_matches: u32,
        n_lmd_payload_bytes: usize,
        lmd_in_stream: InStream,
        lmd_in_pos: usize,
        states: (u16, u16, u16),
    ) {
        self.n_matches = n_matches;
        self.n_lmd_payload_bytes = n_lmd_payload_bytes;
        self.current_literal = 0;
        self.l_value = 0;
        self.m_value = 0;
        self.d_value = NO_DISTANCE;
        self.lmd_in_stream = lmd_in_stream;
        self.lmd_in_pos = lmd_in_pos;
        (self.l_state, self.m_state, self.d_state) = states;
    }
}

/// Copy `len` bytes from `distance` back, as if one byte at a time.
fn copy_match(dst: &mut [u8], pos: usize, distance: usize, len: usize) {
    if distance >= len {
        dst.copy_within(pos - distance..pos - distance + len, pos);
    } else if distance >= 8 {
        let mut done = 0;
        while done < len {
            let n = (len - done).min(distance);
            let from = pos + done - distance;
            dst.copy_within(from..from + n, pos + done);
            done += n;
        }
    } else {
        for i in pos..pos + len {
            dst[i] = dst[i - distance];
        }
    }
}

/// Run the remaining triplets of the block into `dst[*dst_pos..]`.
///
/// `payload` is the block's L/M/D payload and `literals` the decoded
/// literal buffer. Returns [`DecompressStatus::Done`] when every triplet has
/// been executed and [`DecompressStatus::NeedsOutput`] when `dst` filled up.
pub(crate) fn execute(
    bs: &mut LmdState,
    literals: &[u8],
    payload: &[u8],
    dst: &mut [u8],
    dst_pos: &mut usize,
) -> Result<DecompressStatus> {
    let (mut l_state, mut m_state, mut d_state) = (bs.l_state, bs.m_state, bs.d_state);
    let mut input = bs.lmd_in_stream;
    let mut in_pos = bs.lmd_in_pos;
    let mut symbols = bs.n_matches;
    let mut lit = bs.current_literal;
    let (mut l, mut m, mut d) = (bs.l_value, bs.m_value, bs.d_value);
    let mut out = *dst_pos;

    // A pending L or M means the last call stopped inside this triplet.
    let mut resuming = l != 0 || m != 0;

    let status = loop {
        if !resuming {
            if symbols == 0 {
                break DecompressStatus::Done;
            }
            input.flush(payload, &mut in_pos, 0)?;
            l = value_decode(&mut l_state, &bs.l_decoder, &mut input) as usize;
            if lit + l >= literals.len() {
                return Err(OxiArcError::corrupted(
                    in_pos as u64,
                    "literal run past the end of the literal buffer",
                ));
            }
            m = value_decode(&mut m_state, &bs.m_decoder, &mut input) as usize;
            let new_d = value_decode(&mut d_state, &bs.d_decoder, &mut input) as usize;
            if new_d != 0 {
                d = new_d;
            }
            symbols -= 1;
        }
        resuming = false;

        if d > out + l {
            return Err(OxiArcError::invalid_distance(d, out + l));
        }

        let room = dst.len() - out;
        if l + m + FAST_PATH_MARGIN <= room {
            dst[out..out + l].copy_from_slice(&literals[lit..lit + l]);
            out += l;
            lit += l;
            copy_match(dst, out, d, m);
            out += m;
            l = 0;
            m = 0;
            continue;
        }

        // Near the end of the destination: copy exactly what fits.
        let n = l.min(room);
        dst[out..out + n].copy_from_slice(&literals[lit..lit + n]);
        out += n;
        lit += n;
        l -= n;
        if l > 0 {
            break DecompressStatus::NeedsOutput;
        }

        let n = m.min(dst.len() - out);
        copy_match(dst, out, d, n);
        out += n;
        m -= n;
        if m > 0 {
            break DecompressStatus::NeedsOutput;
        }
    };

    bs.l_state = l_state;
    bs.m_state = m_state;
    bs.d_state = d_state;
    bs.lmd_in_stream = input;
    bs.lmd_in_pos = in_pos;
    bs.n_matches = symbols;
    bs.current_literal = lit;
    bs.l_value = l;
    bs.m_value = m;
    bs.d_value = d;
    *dst_pos = out;
    Ok(status)
}

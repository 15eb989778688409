//! Finite State Entropy (FSE) coder.
//!
//! LZFSE codes literals, L, M and D symbols with table-driven FSE. Every
//! alphabet has a normalized frequency table summing to its number of
//! states; from it the encoder and decoder derive their transition tables.
//!
//! Encoding runs backwards over the symbol sequence so that the decoder,
//! which reads the payload from its end, produces symbols in forward order.

use crate::format::ENCODE_LITERAL_SYMBOLS;
use oxiarc_core::bitstream::{InStream, OutStream, mask_lsb64};
use oxiarc_core::error::{OxiArcError, Result};

/// Encoder transition for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderEntry {
    /// States at or above this threshold emit `k` bits, below emit `k - 1`.
    pub s0: i16,
    /// Number of state bits for the high range.
    pub k: u8,
    /// Next-state offset for the high range.
    pub delta0: i16,
    /// Next-state offset for the low range.
    pub delta1: i16,
}

/// Decoder transition for one state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderEntry {
    /// Number of bits to pull for the next state.
    pub k: u8,
    /// Decoded symbol.
    pub symbol: u8,
    /// Next-state offset.
    pub delta: i16,
}

/// Decoder transition for one state, with the symbol expanded to its value
/// base and extra bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueDecoderEntry {
    /// State bits plus extra bits, pulled in one go.
    pub total_bits: u8,
    /// Extra bits of the symbol.
    pub value_bits: u8,
    /// Next-state offset.
    pub delta: i16,
    /// First value of the symbol.
    pub vbase: i32,
}

/// Scale occurrence counts to frequencies summing to exactly `nstates`.
///
/// Every symbol with a nonzero count gets a nonzero frequency.
pub fn normalize_freq(nstates: u32, counts: &[u32], freq: &mut [u16]) {
    let s_count: u64 = counts.iter().map(|&t| u64::from(t)).sum();
    let shift = nstates.leading_zeros() - 1;
    let highprec_step = if s_count == 0 {
        0
    } else {
        (1u64 << 31) / s_count
    };

    let mut remaining = nstates as i32;
    let mut max_freq = 0i32;
    let mut max_freq_sym = 0usize;
    for (sym, (&t, f_out)) in counts.iter().zip(freq.iter_mut()).enumerate() {
        // Rounded to nearest using one extra bit of precision.
        let mut f = ((((u64::from(t) * highprec_step) >> shift) + 1) >> 1) as i32;
        if f == 0 && t != 0 {
            f = 1;
        }
        *f_out = f as u16;
        remaining -= f;
        if f > max_freq {
            max_freq = f;
            max_freq_sym = sym;
        }
    }

    if -remaining < (max_freq >> 2) {
        freq[max_freq_sym] = (i32::from(freq[max_freq_sym]) + remaining) as u16;
    } else {
        adjust_freqs(freq, -remaining);
    }
}

/// Take `overrun` away from the frequencies, larger ones first, never
/// dropping a used symbol below 1.
fn adjust_freqs(freq: &mut [u16], mut overrun: i32) {
    let mut shift = 3;
    while overrun != 0 {
        for f in freq.iter_mut() {
            if *f > 1 {
                let n = ((i32::from(*f) - 1) >> shift).min(overrun);
                *f -= n as u16;
                overrun -= n;
                if overrun == 0 {
                    break;
                }
            }
        }
        if shift == 0 {
            break;
        }
        shift -= 1;
    }
}

/// Check that a frequency table fits its number of states.
pub fn check_freq(table: &'static str, freq: &[u16], nstates: u32) -> Result<()> {
    let sum: u32 = freq.iter().map(|&f| u32::from(f)).sum();
    if sum > nstates {
        return Err(OxiArcError::invalid_frequency_table(table, sum, nstates));
    }
    Ok(())
}

/// Build the encoder table of a normalized frequency table.
pub fn init_encoder_table(nstates: u32, freq: &[u16], table: &mut [EncoderEntry]) {
    let nstates = nstates as i32;
    let n_clz = nstates.leading_zeros();
    let mut offset = 0i32;
    for (&f, entry) in freq.iter().zip(table.iter_mut()) {
        if f == 0 {
            continue;
        }
        let f = i32::from(f);
        let k = f.leading_zeros() - n_clz;
        let delta0 = offset - f + (nstates >> k);
        *entry = EncoderEntry {
            s0: ((f << k) - nstates) as i16,
            k: k as u8,
            delta0: delta0 as i16,
            // k == 0 means a single symbol owns every state and the low
            // range is empty.
            delta1: if k > 0 {
                (offset - f + (nstates >> (k - 1))) as i16
            } else {
                delta0 as i16
            },
        };
        offset += f;
    }
}

/// Iterate the decoder transitions of every used symbol, in state order.
///
/// Yields `(symbol, k, delta)` per state and fails as soon as the running
/// frequency sum exceeds `nstates`.
fn for_each_state(
    table_name: &'static str,
    nstates: u32,
    freq: &[u16],
    mut emit: impl FnMut(usize, usize, u32, i32),
) -> Result<()> {
    let n = nstates as i32;
    let n_clz = nstates.leading_zeros();
    let mut sum_of_freq = 0u32;
    let mut state = 0usize;
    for (symbol, &f) in freq.iter().enumerate() {
        if f == 0 {
            continue;
        }
        sum_of_freq += u32::from(f);
        if sum_of_freq > nstates {
            return Err(OxiArcError::invalid_frequency_table(
                table_name,
                sum_of_freq,
                nstates,
            ));
        }

        let f = i32::from(f);
        let k = (f as u32).leading_zeros() - n_clz;
        let j0 = ((2 * n) >> k) - f;
        for j in 0..f {
            if j < j0 {
                emit(state, symbol, k, ((f + j) << k) - n);
            } else {
                emit(state, symbol, k - 1, (j - j0) << (k - 1));
            }
            state += 1;
        }
    }
    Ok(())
}

/// Build the literal decoder table.
pub fn init_decoder_table(nstates: u32, freq: &[u16], table: &mut [DecoderEntry]) -> Result<()> {
    debug_assert!(freq.len() <= ENCODE_LITERAL_SYMBOLS);
    table.fill(DecoderEntry::default());
    for_each_state("literal", nstates, freq, |state, symbol, k, delta| {
        table[state] = DecoderEntry {
            k: k as u8,
            symbol: symbol as u8,
            delta: delta as i16,
        };
    })
}

/// Build an L, M or D decoder table.
pub fn init_value_decoder_table(
    table_name: &'static str,
    nstates: u32,
    freq: &[u16],
    symbol_vbits: &[u8],
    symbol_vbase: &[i32],
    table: &mut [ValueDecoderEntry],
) -> Result<()> {
    table.fill(ValueDecoderEntry::default());
    for_each_state(table_name, nstates, freq, |state, symbol, k, delta| {
        let value_bits = symbol_vbits[symbol];
        table[state] = ValueDecoderEntry {
            total_bits: k as u8 + value_bits,
            value_bits,
            delta: delta as i16,
            vbase: symbol_vbase[symbol],
        };
    })
}

/// Encode `symbol`, pushing the low bits of the current state.
#[inline]
pub fn encode(state: &mut u16, table: &[EncoderEntry], out: &mut OutStream, symbol: usize) {
    let e = table[symbol];
    let s = i32::from(*state);
    let (nbits, delta) = if s >= i32::from(e.s0) {
        (u32::from(e.k), i32::from(e.delta0))
    } else {
        (u32::from(e.k) - 1, i32::from(e.delta1))
    };
    out.push(s as u64, nbits);
    *state = (delta + (s >> nbits)) as u16;
}

/// Decode one literal.
#[inline]
pub fn decode(state: &mut u16, table: &[DecoderEntry], input: &mut InStream) -> u8 {
    let e = table[usize::from(*state)];
    *state = (i32::from(e.delta) + input.pull(u32::from(e.k)) as i32) as u16;
    e.symbol
}

/// Decode one L, M or D value.
#[inline]
pub fn value_decode(state: &mut u16, table: &[ValueDecoderEntry], input: &mut InStream) -> u32 {
    let e = table[usize::from(*state)];
    let pulled = input.pull(u32::from(e.total_bits));
    *state = (i32::from(e.delta) + (pulled >> e.value_bits) as i32) as u16;
    (e.vbase + mask_lsb64(pulled, u32::from(e.value_bits)) as i32) as u32
}

//! Block magics, alphabet sizes and the L/M/D value tables.
//!
//! An LZFSE stream is a sequence of blocks, each starting with a 4-byte
//! little-endian magic, and terminated by the end-of-stream block.
//!
//! Literal lengths (L), match lengths (M) and match distances (D) are coded
//! as a symbol plus extra bits: symbol `s` covers the values
//! `BASE[s] ..= BASE[s] + (1 << EXTRA_BITS[s]) - 1`.

/// End of stream block ("bvx$").
pub const ENDOFSTREAM_BLOCK_MAGIC: u32 = 0x2478_7662;
/// Uncompressed block ("bvx-").
pub const UNCOMPRESSED_BLOCK_MAGIC: u32 = 0x2d78_7662;
/// Compressed block with verbose header ("bvx1").
pub const COMPRESSEDV1_BLOCK_MAGIC: u32 = 0x3178_7662;
/// Compressed block with packed header ("bvx2").
pub const COMPRESSEDV2_BLOCK_MAGIC: u32 = 0x3278_7662;
/// LZVN block ("bvxn").
pub const COMPRESSEDLZVN_BLOCK_MAGIC: u32 = 0x6e78_7662;

/// Number of L symbols.
pub const ENCODE_L_SYMBOLS: usize = 20;
/// Number of M symbols.
pub const ENCODE_M_SYMBOLS: usize = 20;
/// Number of D symbols.
pub const ENCODE_D_SYMBOLS: usize = 64;
/// Number of literal symbols.
pub const ENCODE_LITERAL_SYMBOLS: usize = 256;

/// Number of L coder states.
pub const ENCODE_L_STATES: usize = 64;
/// Number of M coder states.
pub const ENCODE_M_STATES: usize = 64;
/// Number of D coder states.
pub const ENCODE_D_STATES: usize = 256;
/// Number of literal coder states.
pub const ENCODE_LITERAL_STATES: usize = 1024;

/// Maximum number of L/M/D triplets in a compressed block.
pub const MATCHES_PER_BLOCK: usize = 10000;
/// Maximum number of literals in a compressed block.
pub const LITERALS_PER_BLOCK: usize = 4 * MATCHES_PER_BLOCK;

/// Largest L value a single triplet can carry.
pub const ENCODE_MAX_L_VALUE: u32 = 315;
/// Largest M value a single triplet can carry.
pub const ENCODE_MAX_M_VALUE: u32 = 2359;
/// Largest D value a single triplet can carry.
pub const ENCODE_MAX_D_VALUE: u32 = 262_139;

/// Size of the uncompressed block header (magic, raw byte count).
pub const UNCOMPRESSED_HEADER_SIZE: usize = 8;
/// Size of the LZVN block header (magic, raw and payload byte counts).
pub const LZVN_HEADER_SIZE: usize = 12;
/// Size of the end-of-stream block.
pub const ENDOFSTREAM_SIZE: usize = 4;

/// Extra bits of each L symbol.
pub const L_EXTRA_BITS: [u8; ENCODE_L_SYMBOLS] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 3, 5, 8,
];

/// First value of each L symbol.
pub const L_BASE_VALUE: [i32; ENCODE_L_SYMBOLS] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 20, 28, 60,
];

/// Extra bits of each M symbol.
pub const M_EXTRA_BITS: [u8; ENCODE_M_SYMBOLS] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 5, 8, 11,
];

/// First value of each M symbol.
pub const M_BASE_VALUE: [i32; ENCODE_M_SYMBOLS] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 24, 56, 312,
];

/// Extra bits of each D symbol.
pub const D_EXTRA_BITS: [u8; ENCODE_D_SYMBOLS] = [
    0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6, 7, 7, 7,
    7, 8, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 13, 14,
    14, 14, 14, 15, 15, 15, 15,
];

/// First value of each D symbol.
pub const D_BASE_VALUE: [i32; ENCODE_D_SYMBOLS] = [
    0, 1, 2, 3, 4, 6, 8, 10, 12, 16, 20, 24, 28, 36, 44, 52, 60, 76, 92, 108, 124, 156, 188, 220,
    252, 316, 380, 444, 508, 636, 764, 892, 1020, 1276, 1532, 1788, 2044, 2556, 3068, 3580, 4092,
    5116, 6140, 7164, 8188, 10236, 12284, 14332, 16380, 20476, 24572, 28668, 32764, 40956, 49148,
    57340, 65532, 81916, 98300, 114684, 131068, 163836, 196604, 229372,
];

/// Largest symbol whose base is not above `value`.
#[inline]
fn symbol_for(base: &[i32], value: u32) -> usize {
    base.partition_point(|&b| b as u32 <= value) - 1
}

/// L symbol for a literal length in `0..=ENCODE_MAX_L_VALUE`.
#[inline]
pub fn l_symbol(value: u32) -> usize {
    if value < 16 {
        value as usize
    } else {
        symbol_for(&L_BASE_VALUE, value)
    }
}

/// M symbol for a match length in `0..=ENCODE_MAX_M_VALUE`.
#[inline]
pub fn m_symbol(value: u32) -> usize {
    if value < 16 {
        value as usize
    } else {
        symbol_for(&M_BASE_VALUE, value)
    }
}

/// D symbol for a distance in `0..=ENCODE_MAX_D_VALUE`.
#[inline]
pub fn d_symbol(value: u32) -> usize {
    symbol_for(&D_BASE_VALUE, value)
}

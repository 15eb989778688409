//! Compressed block headers.
//!
//! A compressed block is described by [`CompressedBlockHeader`], which is
//! stored on the wire in one of two layouts:
//!
//! - **V1** ("bvx1"): every field at a fixed little-endian offset, with the
//!   frequency tables as plain `u16` arrays. Always 772 bytes.
//! - **V2** ("bvx2"): the counts and states packed into three `u64` words,
//!   followed by the frequency tables in a variable-length prefix code.
//!
//! V2 packed words (bit offset, width):
//!
//! ```text
//! word 0: n_literals (0, 20)  n_literal_payload_bytes (20, 20)
//!         n_matches (40, 20)  literal_bits + 7 (60, 3)
//! word 1: literal_state[0..4] (0/10/20/30, 10 each)
//!         n_lmd_payload_bytes (40, 20)  lmd_bits + 7 (60, 3)
//! word 2: header_size (0, 32)  l_state (32, 10)  m_state (42, 10)
//!         d_state (52, 10)
//! ```

use crate::format::{
    COMPRESSEDV1_BLOCK_MAGIC, COMPRESSEDV2_BLOCK_MAGIC, ENCODE_D_STATES, ENCODE_D_SYMBOLS,
    ENCODE_L_STATES, ENCODE_L_SYMBOLS, ENCODE_LITERAL_STATES, ENCODE_LITERAL_SYMBOLS,
    ENCODE_M_STATES, ENCODE_M_SYMBOLS, LITERALS_PER_BLOCK, MATCHES_PER_BLOCK,
};
use crate::fse::check_freq;
use oxiarc_core::error::{OxiArcError, Result};
use tracing::debug;

/// Size of a V1 header.
pub const V1_HEADER_SIZE: usize = 772;
/// Offset of the frequency tables in a V2 header.
pub const V2_FREQ_OFFSET: usize = 32;
/// Largest V2 header, with every frequency at its longest code.
pub const V2_MAX_HEADER_SIZE: usize =
    V2_FREQ_OFFSET + 2 * (ENCODE_L_SYMBOLS + ENCODE_M_SYMBOLS + ENCODE_D_SYMBOLS + ENCODE_LITERAL_SYMBOLS);

pub(crate) fn load_u16(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(pos..pos + 2)?.try_into().ok()?))
}

pub(crate) fn load_u32(buf: &[u8], pos: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().ok()?))
}

pub(crate) fn load_u64(buf: &[u8], pos: usize) -> Option<u64> {
    Some(u64::from_le_bytes(buf.get(pos..pos + 8)?.try_into().ok()?))
}

fn store(dst: &mut [u8], pos: usize, bytes: &[u8]) -> Result<()> {
    let end = pos + bytes.len();
    let available = dst.len();
    dst.get_mut(pos..end)
        .ok_or_else(|| OxiArcError::buffer_too_small(end, available))?
        .copy_from_slice(bytes);
    Ok(())
}

/// Decoded form of a compressed block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlockHeader {
    /// Bytes produced by decoding the block.
    pub n_raw_bytes: u32,
    /// Payload bytes following the header.
    pub n_payload_bytes: u32,
    /// Number of literals, a multiple of 4.
    pub n_literals: u32,
    /// Number of L/M/D triplets.
    pub n_matches: u32,
    /// Bytes of the literal bit stream.
    pub n_literal_payload_bytes: u32,
    /// Bytes of the L/M/D bit stream.
    pub n_lmd_payload_bytes: u32,
    /// Final bit count of the literal stream, in `-7..=0`.
    pub literal_bits: i32,
    /// Initial literal decoder states.
    pub literal_state: [u16; 4],
    /// Final bit count of the L/M/D stream, in `-7..=0`.
    pub lmd_bits: i32,
    /// Initial L decoder state.
    pub l_state: u16,
    /// Initial M decoder state.
    pub m_state: u16,
    /// Initial D decoder state.
    pub d_state: u16,
    /// Normalized L frequencies.
    pub l_freq: [u16; ENCODE_L_SYMBOLS],
    /// Normalized M frequencies.
    pub m_freq: [u16; ENCODE_M_SYMBOLS],
    /// Normalized D frequencies.
    pub d_freq: [u16; ENCODE_D_SYMBOLS],
    /// Normalized literal frequencies.
    pub literal_freq: [u16; ENCODE_LITERAL_SYMBOLS],
}

impl Default for CompressedBlockHeader {
    fn default() -> Self {
        Self {
            n_raw_bytes: 0,
            n_payload_bytes: 0,
            n_literals: 0,
            n_matches: 0,
            n_literal_payload_bytes: 0,
            n_lmd_payload_bytes: 0,
            literal_bits: 0,
            literal_state: [0; 4],
            lmd_bits: 0,
            l_state: 0,
            m_state: 0,
            d_state: 0,
            l_freq: [0; ENCODE_L_SYMBOLS],
            m_freq: [0; ENCODE_M_SYMBOLS],
            d_freq: [0; ENCODE_D_SYMBOLS],
            literal_freq: [0; ENCODE_LITERAL_SYMBOLS],
        }
    }
}

/// Largest frequency the V2 table code can represent.
const MAX_CODED_FREQ: u16 = 24 + 1023;

/// Prefix code of one frequency value: `(bits, nbits)`.
fn encode_freq_value(value: u16) -> Result<(u32, u32)> {
    const SMALL: [(u32, u32); 8] = [
        (0, 2),
        (2, 2),
        (1, 3),
        (5, 3),
        (3, 5),
        (11, 5),
        (19, 5),
        (27, 5),
    ];
    if value > MAX_CODED_FREQ {
        return Err(OxiArcError::invalid_header(format!(
            "frequency {value} exceeds the largest codable value {MAX_CODED_FREQ}"
        )));
    }
    let v = u32::from(value);
    Ok(match v {
        0..=7 => SMALL[v as usize],
        8..=23 => (((v - 8) << 4) + 7, 8),
        _ => (((v - 24) << 4) + 15, 14),
    })
}

/// Decode the frequency at the bottom of `bits`: `(value, nbits)`.
fn decode_freq_value(bits: u32) -> (u16, u32) {
    const NBITS: [u8; 32] = [
        2, 3, 2, 5, 2, 3, 2, 8, 2, 3, 2, 5, 2, 3, 2, 14, 2, 3, 2, 5, 2, 3, 2, 8, 2, 3, 2, 5, 2, 3, 2,
        14,
    ];
    const VALUE: [u8; 32] = [
        0, 2, 1, 4, 0, 3, 1, 0, 0, 2, 1, 5, 0, 3, 1, 0, 0, 2, 1, 6, 0, 3, 1, 0, 0, 2, 1, 7, 0, 3, 1,
        0,
    ];
    let b = (bits & 31) as usize;
    match NBITS[b] {
        8 => (8 + ((bits >> 4) & 0xf) as u16, 8),
        14 => (24 + ((bits >> 4) & 0x3ff) as u16, 14),
        n => (u16::from(VALUE[b]), u32::from(n)),
    }
}

fn get_field(word: u64, offset: u32, nbits: u32) -> u32 {
    ((word >> offset) & ((1u64 << nbits) - 1)) as u32
}

fn set_field(value: u32, offset: u32, nbits: u32) -> u64 {
    debug_assert!(u64::from(value) < (1u64 << nbits));
    (u64::from(value) & ((1u64 << nbits) - 1)) << offset
}

impl CompressedBlockHeader {
    fn freq_tables(&self) -> impl Iterator<Item = u16> + '_ {
        self.l_freq
            .iter()
            .chain(&self.m_freq)
            .chain(&self.d_freq)
            .chain(&self.literal_freq)
            .copied()
    }

    fn freq_tables_mut(&mut self) -> impl Iterator<Item = &mut u16> {
        self.l_freq
            .iter_mut()
            .chain(self.m_freq.iter_mut())
            .chain(self.d_freq.iter_mut())
            .chain(self.literal_freq.iter_mut())
    }

    /// Validate counts, initial states and frequency tables.
    pub fn check(&self) -> Result<()> {
        let fail = |message: String| {
            debug!(%message, "rejecting compressed block header");
            Err(OxiArcError::invalid_header(message))
        };
        if self.n_literals as usize > LITERALS_PER_BLOCK {
            return fail(format!("{} literals exceed {}", self.n_literals, LITERALS_PER_BLOCK));
        }
        if self.n_literals % 4 != 0 {
            return fail(format!("{} literals is not a multiple of 4", self.n_literals));
        }
        if self.n_matches as usize > MATCHES_PER_BLOCK {
            return fail(format!("{} matches exceed {}", self.n_matches, MATCHES_PER_BLOCK));
        }
        if let Some(s) = self
            .literal_state
            .iter()
            .find(|&&s| usize::from(s) >= ENCODE_LITERAL_STATES)
        {
            return fail(format!("literal state {s} out of range"));
        }
        for (name, state, nstates) in [
            ("L", self.l_state, ENCODE_L_STATES),
            ("M", self.m_state, ENCODE_M_STATES),
            ("D", self.d_state, ENCODE_D_STATES),
        ] {
            if usize::from(state) >= nstates {
                return fail(format!("{name} state {state} out of range"));
            }
        }
        check_freq("L", &self.l_freq, ENCODE_L_STATES as u32)?;
        check_freq("M", &self.m_freq, ENCODE_M_STATES as u32)?;
        check_freq("D", &self.d_freq, ENCODE_D_STATES as u32)?;
        check_freq("literal", &self.literal_freq, ENCODE_LITERAL_STATES as u32)?;
        Ok(())
    }

    /// Parse a V1 header starting at its magic.
    pub fn read_v1(src: &[u8]) -> Result<Self> {
        if src.len() < V1_HEADER_SIZE {
            return Err(OxiArcError::unexpected_eof(V1_HEADER_SIZE - src.len()));
        }
        let u32_at = |pos| load_u32(src, pos).unwrap_or_default();
        let u16_at = |pos| load_u16(src, pos).unwrap_or_default();

        let mut header = Self {
            n_raw_bytes: u32_at(4),
            n_payload_bytes: u32_at(8),
            n_literals: u32_at(12),
            n_matches: u32_at(16),
            n_literal_payload_bytes: u32_at(20),
            n_lmd_payload_bytes: u32_at(24),
            literal_bits: u32_at(28) as i32,
            literal_state: [u16_at(32), u16_at(34), u16_at(36), u16_at(38)],
            lmd_bits: u32_at(40) as i32,
            l_state: u16_at(44),
            m_state: u16_at(46),
            d_state: u16_at(48),
            ..Self::default()
        };
        for (i, f) in header.freq_tables_mut().enumerate() {
            *f = u16_at(50 + 2 * i);
        }
        Ok(header)
    }

    /// Write the V1 layout into `dst[..V1_HEADER_SIZE]`.
    pub fn write_v1(&self, dst: &mut [u8]) -> Result<()> {
        let mut bytes = [0u8; V1_HEADER_SIZE];
        let words = [
            COMPRESSEDV1_BLOCK_MAGIC,
            self.n_raw_bytes,
            self.n_payload_bytes,
            self.n_literals,
            self.n_matches,
            self.n_literal_payload_bytes,
            self.n_lmd_payload_bytes,
            self.literal_bits as u32,
        ];
        for (i, w) in words.iter().enumerate() {
            bytes[4 * i..4 * i + 4].copy_from_slice(&w.to_le_bytes());
        }
        for (i, s) in self.literal_state.iter().enumerate() {
            bytes[32 + 2 * i..34 + 2 * i].copy_from_slice(&s.to_le_bytes());
        }
        bytes[40..44].copy_from_slice(&(self.lmd_bits as u32).to_le_bytes());
        bytes[44..46].copy_from_slice(&self.l_state.to_le_bytes());
        bytes[46..48].copy_from_slice(&self.m_state.to_le_bytes());
        bytes[48..50].copy_from_slice(&self.d_state.to_le_bytes());
        for (i, f) in self.freq_tables().enumerate() {
            bytes[50 + 2 * i..52 + 2 * i].copy_from_slice(&f.to_le_bytes());
        }
        store(dst, 0, &bytes)
    }

    /// Write the V2 frequency code into `dst`, returning its length.
    pub fn encode_freq_tables(&self, dst: &mut [u8]) -> Result<usize> {
        let mut bytes = [0u8; V2_MAX_HEADER_SIZE - V2_FREQ_OFFSET];
        let mut len = 0;
        let mut accum = 0u32;
        let mut accum_nbits = 0u32;
        for f in self.freq_tables() {
            let (bits, nbits) = encode_freq_value(f)?;
            accum |= bits << accum_nbits;
            accum_nbits += nbits;
            while accum_nbits >= 8 {
                bytes[len] = accum as u8;
                len += 1;
                accum >>= 8;
                accum_nbits -= 8;
            }
        }
        if accum_nbits > 0 {
            bytes[len] = accum as u8;
            len += 1;
        }
        store(dst, 0, &bytes[..len])?;
        Ok(len)
    }

    /// The three packed V2 words, for a header of `header_size` bytes.
    pub fn packed_fields(&self, header_size: u32) -> [u64; 3] {
        let s = &self.literal_state;
        [
            set_field(self.n_literals, 0, 20)
                | set_field(self.n_literal_payload_bytes, 20, 20)
                | set_field(self.n_matches, 40, 20)
                | set_field((self.literal_bits + 7) as u32, 60, 3),
            set_field(u32::from(s[0]), 0, 10)
                | set_field(u32::from(s[1]), 10, 10)
                | set_field(u32::from(s[2]), 20, 10)
                | set_field(u32::from(s[3]), 30, 10)
                | set_field(self.n_lmd_payload_bytes, 40, 20)
                | set_field((self.lmd_bits + 7) as u32, 60, 3),
            set_field(header_size, 0, 32)
                | set_field(u32::from(self.l_state), 32, 10)
                | set_field(u32::from(self.m_state), 42, 10)
                | set_field(u32::from(self.d_state), 52, 10),
        ]
    }

    /// Write the fixed 32-byte part of a V2 header.
    pub fn write_v2_fixed(&self, header_size: usize, dst: &mut [u8]) -> Result<()> {
        let mut bytes = [0u8; V2_FREQ_OFFSET];
        bytes[0..4].copy_from_slice(&COMPRESSEDV2_BLOCK_MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.n_raw_bytes.to_le_bytes());
        for (i, w) in self.packed_fields(header_size as u32).iter().enumerate() {
            bytes[8 + 8 * i..16 + 8 * i].copy_from_slice(&w.to_le_bytes());
        }
        store(dst, 0, &bytes)
    }

    /// Write a complete V2 header, returning its size.
    pub fn pack_v2(&self, dst: &mut [u8]) -> Result<usize> {
        let freq_len = self.encode_freq_tables(dst.get_mut(V2_FREQ_OFFSET..).unwrap_or_default())?;
        let header_size = V2_FREQ_OFFSET + freq_len;
        self.write_v2_fixed(header_size, dst)?;
        Ok(header_size)
    }

    /// Total size of the V2 header starting at `src`, if its fixed part is
    /// available.
    pub fn v2_header_size(src: &[u8]) -> Option<usize> {
        load_u64(src, 24).map(|w| get_field(w, 0, 32) as usize)
    }

    /// Parse a V2 header starting at its magic.
    pub fn unpack_v2(src: &[u8]) -> Result<Self> {
        let header_size = Self::v2_header_size(src)
            .ok_or_else(|| OxiArcError::unexpected_eof(V2_FREQ_OFFSET - src.len()))?;
        if !(V2_FREQ_OFFSET..=V2_MAX_HEADER_SIZE).contains(&header_size) {
            return Err(OxiArcError::invalid_header(format!(
                "header size {header_size} out of range"
            )));
        }
        if src.len() < header_size {
            return Err(OxiArcError::unexpected_eof(header_size - src.len()));
        }
        let w = |i: usize| load_u64(src, 8 + 8 * i).unwrap_or_default();
        let (w0, w1, w2) = (w(0), w(1), w(2));

        let n_literal_payload_bytes = get_field(w0, 20, 20);
        let n_lmd_payload_bytes = get_field(w1, 40, 20);
        let mut header = Self {
            n_raw_bytes: load_u32(src, 4).unwrap_or_default(),
            n_payload_bytes: n_literal_payload_bytes + n_lmd_payload_bytes,
            n_literals: get_field(w0, 0, 20),
            n_matches: get_field(w0, 40, 20),
            n_literal_payload_bytes,
            n_lmd_payload_bytes,
            literal_bits: get_field(w0, 60, 3) as i32 - 7,
            literal_state: [
                get_field(w1, 0, 10) as u16,
                get_field(w1, 10, 10) as u16,
                get_field(w1, 20, 10) as u16,
                get_field(w1, 30, 10) as u16,
            ],
            lmd_bits: get_field(w1, 60, 3) as i32 - 7,
            l_state: get_field(w2, 32, 10) as u16,
            m_state: get_field(w2, 42, 10) as u16,
            d_state: get_field(w2, 52, 10) as u16,
            ..Self::default()
        };

        let freq_bytes = &src[V2_FREQ_OFFSET..header_size];
        if freq_bytes.is_empty() {
            // Tables omitted: all frequencies zero.
            return Ok(header);
        }

        let mut pos = 0;
        let mut accum = 0u32;
        let mut accum_nbits = 0u32;
        for f in header.freq_tables_mut() {
            while pos < freq_bytes.len() && accum_nbits + 8 <= 32 {
                accum |= u32::from(freq_bytes[pos]) << accum_nbits;
                accum_nbits += 8;
                pos += 1;
            }
            let (value, nbits) = decode_freq_value(accum);
            if nbits > accum_nbits {
                return Err(OxiArcError::invalid_header("frequency tables truncated"));
            }
            *f = value;
            accum >>= nbits;
            accum_nbits -= nbits;
        }
        if accum_nbits >= 8 || pos != freq_bytes.len() {
            return Err(OxiArcError::invalid_header(
                "frequency tables do not fill the header",
            ));
        }
        Ok(header)
    }
}

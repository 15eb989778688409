//! Bit accumulators for FSE-coded payloads.
//!
//! FSE payloads are written forwards and read backwards. The writer pushes
//! values into the low end of a 64-bit accumulator and periodically stores
//! the whole bytes it holds; the reader starts at the end of the payload and
//! pulls values from the high end, refilling from lower addresses.
//!
//! # Bit Ordering
//!
//! Within the accumulator newer values sit above older ones, and bytes are
//! stored little-endian. A reader therefore sees values in the reverse order
//! they were pushed.
//!
//! # Example
//!
//! ```
//! use oxiarc_core::bitstream::{InStream, OutStream};
//!
//! let mut buf = vec![0u8; 16];
//! let mut pos = 0;
//! let mut out = OutStream::new();
//! out.push(0b101, 3);
//! out.push(0b1100, 4);
//! out.flush(&mut buf, &mut pos).unwrap();
//! let nbits = out.finish(&mut buf, &mut pos).unwrap();
//!
//! // A payload shorter than 8 bytes is read with the bytes before it.
//! let mut payload = vec![0u8; 8];
//! payload.extend_from_slice(&buf[..pos]);
//! let mut end = payload.len();
//! let mut input = InStream::new(nbits, &payload, &mut end, 0).unwrap();
//! assert_eq!(input.pull(4), 0b1100);
//! assert_eq!(input.pull(3), 0b101);
//! ```

use crate::error::{OxiArcError, Result};

/// Keep the low `nbits` bits of `x`.
#[inline]
pub fn mask_lsb64(x: u64, nbits: u32) -> u64 {
    if nbits >= 64 {
        x
    } else {
        x & ((1u64 << nbits) - 1)
    }
}

/// Little-endian load of up to eight bytes.
#[inline]
fn load_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Forward bit writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutStream {
    /// Pending bits, oldest in the low end.
    accum: u64,
    /// Number of valid bits in `accum` (0..=63).
    accum_nbits: u32,
}

impl OutStream {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits waiting in the accumulator.
    pub fn pending_bits(&self) -> u32 {
        self.accum_nbits
    }

    /// Append the low `n` bits of `bits`.
    ///
    /// The caller flushes often enough that the accumulator never holds more
    /// than 64 bits.
    #[inline]
    pub fn push(&mut self, bits: u64, n: u32) {
        debug_assert!(self.accum_nbits + n <= 64);
        if n == 0 {
            return;
        }
        self.accum |= mask_lsb64(bits, n) << self.accum_nbits;
        self.accum_nbits += n;
    }

    /// Store every complete byte of the accumulator at `dst[*pos..]`.
    pub fn flush(&mut self, dst: &mut [u8], pos: &mut usize) -> Result<()> {
        let nbits = self.accum_nbits & !7;
        let nbytes = (nbits >> 3) as usize;
        let end = *pos + nbytes;
        let len = dst.len();
        let slot = dst
            .get_mut(*pos..end)
            .ok_or_else(|| OxiArcError::buffer_too_small(end, len))?;
        slot.copy_from_slice(&self.accum.to_le_bytes()[..nbytes]);
        *pos = end;
        self.accum = if nbits >= 64 { 0 } else { self.accum >> nbits };
        self.accum_nbits -= nbits;
        Ok(())
    }

    /// Flush, then store the remaining partial byte padded with zeros.
    ///
    /// Returns the stream's final bit count in `-7..=0`: minus the number of
    /// padding bits in the last byte. The reader needs it to start.
    pub fn finish(&mut self, dst: &mut [u8], pos: &mut usize) -> Result<i32> {
        self.flush(dst, pos)?;
        if self.accum_nbits == 0 {
            return Ok(0);
        }
        let (needed, len) = (*pos + 1, dst.len());
        let slot = dst
            .get_mut(*pos)
            .ok_or_else(|| OxiArcError::buffer_too_small(needed, len))?;
        *slot = self.accum as u8;
        *pos += 1;
        let padding = 8 - self.accum_nbits as i32;
        self.accum = 0;
        self.accum_nbits = 0;
        Ok(-padding)
    }
}

/// Backward bit reader.
///
/// The reader does not borrow its buffer; every refill takes the payload
/// slice, the current read position (moving towards lower offsets) and the
/// lowest offset it may touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct InStream {
    /// Unread bits, newest in the high end.
    accum: u64,
    /// Number of valid bits in `accum`.
    accum_nbits: u32,
}

impl InStream {
    /// Start reading a stream that ends at `buf[..*pos]`.
    ///
    /// `nbits` is the value returned by [`OutStream::finish`]. The first
    /// load may read up to eight bytes before `*pos`, never below `start`.
    pub fn new(nbits: i32, buf: &[u8], pos: &mut usize, start: usize) -> Result<Self> {
        let (nbytes, total_bits) = if nbits != 0 {
            (8usize, nbits + 64)
        } else {
            (7usize, 56)
        };
        if !(56..64).contains(&total_bits) {
            return Err(OxiArcError::corrupted(
                *pos as u64,
                format!("invalid stream bit count {nbits}"),
            ));
        }
        if *pos < start + nbytes || *pos > buf.len() {
            return Err(OxiArcError::corrupted(
                *pos as u64,
                "bit stream starts before its buffer",
            ));
        }
        *pos -= nbytes;
        let accum = load_le(&buf[*pos..*pos + nbytes]);
        let accum_nbits = total_bits as u32;
        if accum >> accum_nbits != 0 {
            return Err(OxiArcError::corrupted(
                *pos as u64,
                "bit stream has set padding bits",
            ));
        }
        Ok(Self { accum, accum_nbits })
    }

    /// Number of bits available without refilling.
    pub fn available_bits(&self) -> u32 {
        self.accum_nbits
    }

    /// Refill the accumulator to at least 56 bits.
    pub fn flush(&mut self, buf: &[u8], pos: &mut usize, start: usize) -> Result<()> {
        let nbits = (63 - self.accum_nbits) & !7;
        let nbytes = (nbits >> 3) as usize;
        if *pos < start + nbytes || *pos > buf.len() {
            return Err(OxiArcError::corrupted(
                *pos as u64,
                "bit stream read before its buffer",
            ));
        }
        *pos -= nbytes;
        let incoming = load_le(&buf[*pos..*pos + nbytes]);
        self.accum = if nbits == 0 {
            self.accum
        } else {
            (self.accum << nbits) | incoming
        };
        self.accum_nbits += nbits;
        Ok(())
    }

    /// Take the next `n` bits.
    #[inline]
    pub fn pull(&mut self, n: u32) -> u64 {
        debug_assert!(n <= self.accum_nbits);
        self.accum_nbits -= n;
        let result = self.accum >> self.accum_nbits;
        self.accum = mask_lsb64(self.accum, self.accum_nbits);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_lsb() {
        assert_eq!(mask_lsb64(u64::MAX, 0), 0);
        assert_eq!(mask_lsb64(u64::MAX, 12), 0xfff);
        assert_eq!(mask_lsb64(u64::MAX, 64), u64::MAX);
    }

    #[test]
    fn test_out_stream_flush_and_finish() {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        let mut out = OutStream::new();
        out.push(0xab, 8);
        out.push(0x5, 3);
        out.flush(&mut buf, &mut pos).unwrap();
        assert_eq!(pos, 1);
        assert_eq!(buf[0], 0xab);
        assert_eq!(out.pending_bits(), 3);

        assert_eq!(out.finish(&mut buf, &mut pos).unwrap(), -5);
        assert_eq!(pos, 2);
        assert_eq!(buf[1], 0x5);
        assert_eq!(out.pending_bits(), 0);
    }

    #[test]
    fn test_out_stream_buffer_too_small() {
        let mut buf = [0u8; 1];
        let mut pos = 0;
        let mut out = OutStream::new();
        out.push(0xffff, 16);
        assert!(matches!(
            out.flush(&mut buf, &mut pos),
            Err(OxiArcError::BufferTooSmall { .. })
        ));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_finish_reports_sizes() {
        let mut buf = [0u8; 1];
        let mut pos = 0;
        let mut out = OutStream::new();
        out.push(0xfff, 12);
        assert!(matches!(
            out.finish(&mut buf, &mut pos),
            Err(OxiArcError::BufferTooSmall {
                needed: 2,
                available: 1
            })
        ));
        assert_eq!(pos, 1);
        assert_eq!(buf[0], 0xff);
    }

    #[test]
    fn test_backward_roundtrip() {
        let values: Vec<(u64, u32)> = (0..200u64).map(|i| (i * 7919, (i % 13 + 1) as u32)).collect();

        let mut buf = vec![0u8; 8 + 512];
        let mut pos = 8;
        let mut out = OutStream::new();
        for &(v, n) in &values {
            out.push(v, n);
            if out.pending_bits() > 40 {
                out.flush(&mut buf, &mut pos).unwrap();
            }
        }
        let nbits = out.finish(&mut buf, &mut pos).unwrap();

        let mut input = InStream::new(nbits, &buf, &mut pos, 0).unwrap();
        for &(v, n) in values.iter().rev() {
            if input.available_bits() < n {
                input.flush(&buf, &mut pos, 0).unwrap();
            }
            assert_eq!(input.pull(n), mask_lsb64(v, n));
        }
    }

    #[test]
    fn test_in_stream_rejects_bad_bit_count() {
        let buf = [0u8; 16];
        let mut pos = 16;
        assert!(InStream::new(1, &buf, &mut pos, 0).is_err());
        let mut pos = 16;
        assert!(InStream::new(-9, &buf, &mut pos, 0).is_err());
    }

    #[test]
    fn test_in_stream_rejects_padding_bits() {
        // nbits = -3 means the top three bits of the last byte must be clear.
        let buf = [0u8, 0, 0, 0, 0, 0, 0, 0xe0];
        let mut pos = 8;
        assert!(InStream::new(-3, &buf, &mut pos, 0).is_err());
    }

    #[test]
    fn test_in_stream_respects_start() {
        let buf = [0u8; 16];
        let mut pos = 12;
        assert!(InStream::new(0, &buf, &mut pos, 8).is_err());

        let mut pos = 16;
        let mut input = InStream::new(0, &buf, &mut pos, 8).unwrap();
        assert_eq!(pos, 9);
        input.pull(40);
        assert!(input.flush(&buf, &mut pos, 8).is_err());
    }
}

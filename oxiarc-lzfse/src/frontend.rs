//! Encoder front end: hash-chain match finder.
//!
//! Every source position is hashed on its first four bytes into a table of
//! [`HistorySet`] buckets, each remembering the four most recent positions
//! with that hash. The longest candidate becomes the incoming match, which
//! is weighed against the pending one before either is handed to the back
//! end.

use crate::backend::{EncodeState, Step};
use crate::format::{ENCODE_MAX_D_VALUE, ENCODE_MAX_L_VALUE, ENCODE_MAX_M_VALUE};

/// Candidates kept per hash bucket.
pub(crate) const HASH_WIDTH: usize = 4;

/// History position that never passes the distance check.
pub(crate) const INVALID_POSITION: i64 = -4 * ENCODE_MAX_D_VALUE as i64;

/// Longest match the front end produces before back-end splitting.
const MAX_MATCH_LENGTH: u32 = 100 * ENCODE_MAX_M_VALUE;

/// Bytes at the end of the source never used as a match start.
const TAIL_PADDING: i64 = 8;

/// Literal lag after which literals are flushed without waiting for a match.
const MAX_LITERAL_LAG: i64 = 8 * ENCODE_MAX_L_VALUE as i64;

/// One hash bucket, most recent candidate first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HistorySet {
    pub pos: [i64; HASH_WIDTH],
    pub value: [u32; HASH_WIDTH],
}

impl HistorySet {
    pub const EMPTY: Self = Self {
        pos: [INVALID_POSITION; HASH_WIDTH],
        value: [0; HASH_WIDTH],
    };

    /// This bucket with `(pos, value)` inserted in front.
    fn pushed(&self, pos: i64, value: u32) -> Self {
        let mut next = Self {
            pos: [pos; HASH_WIDTH],
            value: [value; HASH_WIDTH],
        };
        next.pos[1..].copy_from_slice(&self.pos[..HASH_WIDTH - 1]);
        next.value[1..].copy_from_slice(&self.value[..HASH_WIDTH - 1]);
        next
    }
}

/// A match of `length` bytes at `pos` copying from `ref_pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Match {
    pub pos: i64,
    pub ref_pos: i64,
    pub length: u32,
}

impl Match {
    pub const NONE: Self = Self {
        pos: 0,
        ref_pos: 0,
        length: 0,
    };
}

/// Bucket of a 4-byte value.
#[inline]
pub(crate) fn hash_index(x: u32, hash_bits: u32) -> usize {
    (x.wrapping_mul(2_654_435_761) >> (32 - hash_bits)) as usize
}

impl EncodeState<'_> {
    #[inline]
    fn byte_at(&self, pos: i64) -> u8 {
        self.src[self.index(pos)]
    }

    #[inline]
    fn load_u32(&self, pos: i64) -> u32 {
        let i = self.index(pos);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.src[i..i + 4]);
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn load_u64(&self, pos: i64) -> u64 {
        let i = self.index(pos);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.src[i..i + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Scan positions up to `src_end - 8`, emitting matches to the back end.
    pub fn encode_base(&mut self) -> Step {
        let encode_end = self.src_end - TAIL_PADDING;
        while self.src_encode_i < encode_end {
            self.encode_position(self.src_encode_i)?;
            self.src_encode_i += 1;
        }
        Ok(())
    }

    fn encode_position(&mut self, pos: i64) -> Step {
        let x = self.load_u32(pos);
        let slot = hash_index(x, self.hash_bits);
        let candidates = self.history[slot];
        self.history[slot] = candidates.pushed(pos, x);

        // Still inside the previous match.
        if pos < self.src_literal {
            return Ok(());
        }

        let mut incoming = Match {
            pos,
            ref_pos: 0,
            length: 0,
        };
        for (&ref_pos, &value) in candidates.pos.iter().zip(&candidates.value) {
            if value != x || ref_pos + i64::from(ENCODE_MAX_D_VALUE) < pos {
                continue;
            }
            let length = self.match_length(ref_pos, pos);
            if length > incoming.length {
                incoming.length = length;
                incoming.ref_pos = ref_pos;
            }
        }

        if incoming.length == 0 {
            // Keep the literal backlog bounded so it always fits a block.
            if pos - self.src_literal > MAX_LITERAL_LAG {
                if self.pending.length > 0 {
                    self.backend_match(self.pending)?;
                    self.pending = Match::NONE;
                } else {
                    self.backend_literals(i64::from(ENCODE_MAX_L_VALUE))?;
                }
            }
            return Ok(());
        }

        incoming.length = incoming.length.min(MAX_MATCH_LENGTH);

        // Extend backwards over the literal backlog.
        while incoming.pos > self.src_literal
            && incoming.ref_pos > 0
            && self.byte_at(incoming.ref_pos - 1) == self.byte_at(incoming.pos - 1)
        {
            incoming.pos -= 1;
            incoming.ref_pos -= 1;
        }
        incoming.length += (pos - incoming.pos) as u32;

        if incoming.length >= self.good_match_length {
            self.backend_match(incoming)?;
            self.pending = Match::NONE;
        } else if self.pending.length == 0 {
            self.pending = incoming;
        } else if self.pending.pos + i64::from(self.pending.length) <= incoming.pos {
            self.backend_match(self.pending)?;
            self.pending = incoming;
        } else {
            // Overlapping: keep the longer one.
            let best = if incoming.length > self.pending.length {
                incoming
            } else {
                self.pending
            };
            self.backend_match(best)?;
            self.pending = Match::NONE;
        }
        Ok(())
    }

    /// Length of the match between `ref_pos` and `pos`, known to share their
    /// first four bytes. Reads stay below `src_end`.
    fn match_length(&self, ref_pos: i64, pos: i64) -> u32 {
        let max_length = (self.src_end - pos - TAIL_PADDING) as u32;
        let mut length = 4u32;
        while length < max_length {
            let diff = self.load_u64(ref_pos + i64::from(length))
                ^ self.load_u64(pos + i64::from(length));
            if diff != 0 {
                length += diff.trailing_zeros() / 8;
                break;
            }
            length += 8;
        }
        length
    }

    /// Emit the pending match, the trailing literals and the end of stream.
    pub fn finish(&mut self) -> Step {
        if self.pending.length > 0 {
            self.backend_match(self.pending)?;
            self.pending = Match::NONE;
        }
        let l = self.src_end - self.src_literal;
        if l > 0 {
            self.backend_literals(l)?;
        }
        self.backend_end_of_stream()
    }

    /// Move the source window forward by `delta` bytes.
    ///
    /// Every position is shifted back by `delta`; history positions that
    /// would fall below [`INVALID_POSITION`] are clamped to it.
    pub fn translate(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.base += delta as usize;
        self.src_end -= delta;
        self.src_encode_i -= delta;
        self.src_literal -= delta;
        self.pending.pos -= delta;
        self.pending.ref_pos -= delta;
        for set in self.history.iter_mut() {
            for p in &mut set.pos {
                *p = (*p - delta).max(INVALID_POSITION);
            }
        }
    }
}

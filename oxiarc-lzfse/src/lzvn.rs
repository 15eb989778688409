//! LZVN block decoding.
//!
//! LZVN is the byte-oriented codec LZFSE streams use for small inputs. Each
//! opcode carries a literal length L, a match length M and a distance D,
//! with the literal bytes following the opcode:
//!
//! | opcode bits                     | kind     | L      | M          | D               |
//! |---------------------------------|----------|--------|------------|-----------------|
//! | `LLMMMDDD DDDDDDDD`             | sml_d    | 0-3    | 3-10       | 11 bits         |
//! | `LLMMM110`                      | pre_d    | 0-3    | 3-10       | previous        |
//! | `LLMMM111 DDDDDDDD DDDDDDDD`    | lrg_d    | 0-3    | 3-10       | 16 bits         |
//! | `101LLMMM DDDDDDMM DDDDDDDD`    | med_d    | 0-3    | 3-34       | 14 bits         |
//! | `1110LLLL` / `11100000 LLLLLLLL`| sml_l/lrg_l | 1-15 / 16-271 | 0 | -         |
//! | `1111MMMM` / `11110000 MMMMMMMM`| sml_m/lrg_m | 0     | 1-15 / 16-271 | previous |
//! | `00000110` + 7 bytes            | eos      |        |            |                 |
//! | `00001110`, `00010110`          | nop      |        |            |                 |
//!
//! The `LLMMM` forms share the byte with the other kinds, so M is limited by
//! L: up to 10 for L=0 (`0x00-0x3f`), 8 for L=1 (`0x40-0x6f`), 6 for L=2
//! (`0x80-0x9f`) and 4 for L=3 (`0xc0-0xcf`).
//!
//! Undefined: `0x1e`, `0x26`, `0x2e`, `0x36`, `0x3e`, `0x70-0x7f` and
//! `0xd0-0xdf`.
//!
//! Decoding stops whenever the next opcode or its literals are not fully
//! available, or the destination is full; the pending L/M/D are kept so a
//! later call resumes mid-opcode.

use oxiarc_core::error::{OxiArcError, Result};

/// Opcode classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    SmallDistance,
    PreviousDistance,
    LargeDistance,
    MediumDistance,
    SmallLiteral,
    LargeLiteral,
    SmallMatch,
    LargeMatch,
    EndOfStream,
    Nop,
    Undefined,
}

fn classify(opc: u8) -> Opcode {
    match opc {
        0x06 => Opcode::EndOfStream,
        0x0e | 0x16 => Opcode::Nop,
        0x70..=0x7f | 0xd0..=0xdf => Opcode::Undefined,
        0xa0..=0xbf => Opcode::MediumDistance,
        0xe0 => Opcode::LargeLiteral,
        0xe1..=0xef => Opcode::SmallLiteral,
        0xf0 => Opcode::LargeMatch,
        0xf1..=0xff => Opcode::SmallMatch,
        _ => match opc & 7 {
            7 => Opcode::LargeDistance,
            6 if opc < 0x40 => Opcode::Undefined,
            6 => Opcode::PreviousDistance,
            _ => Opcode::SmallDistance,
        },
    }
}

/// Why a decode call returned before the end-of-stream opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzvnStall {
    /// The source ended inside an opcode or its literals.
    Source,
    /// The destination is full.
    Destination,
}

/// Result of one call into the LZVN decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzvnProgress {
    /// Source bytes consumed.
    pub consumed: usize,
    /// Destination bytes written.
    pub produced: usize,
    /// The end-of-stream opcode was consumed.
    pub end_of_stream: bool,
    /// Reason for stopping early, if the stream did not end.
    pub stall: Option<LzvnStall>,
}

/// Resumable LZVN decoder state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LzvnDecoder {
    /// Distance of the last match.
    d_prev: usize,
    /// Literal bytes still to copy from the current opcode.
    pending_l: usize,
    /// Match bytes still to copy from the current opcode.
    pending_m: usize,
    /// Distance of the pending match.
    pending_d: usize,
}

impl LzvnDecoder {
    /// Create a decoder at the start of a block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode from `src` into `dst[dst_pos..]`.
    ///
    /// `dst[..dst_pos]` is the history matches may reference.
    pub fn decode(&mut self, src: &[u8], dst: &mut [u8], dst_pos: usize) -> Result<LzvnProgress> {
        let mut sp = 0usize;
        let mut dp = dst_pos;

        let stall = loop {
            if self.pending_l > 0 || self.pending_m > 0 {
                if let Some(stall) = self.copy_pending(src, &mut sp, dst, &mut dp)? {
                    break Some(stall);
                }
            }

            let Some(&opc) = src.get(sp) else {
                break Some(LzvnStall::Source);
            };
            let avail = src.len() - sp;
            let b1 = || usize::from(src.get(sp + 1).copied().unwrap_or(0));
            let b2 = || usize::from(src.get(sp + 2).copied().unwrap_or(0));

            // (opcode length, L, M, D); None for D means "previous".
            let (opc_len, l, m, d) = match classify(opc) {
                Opcode::EndOfStream => {
                    if avail < 8 {
                        break Some(LzvnStall::Source);
                    }
                    sp += 8;
                    return Ok(LzvnProgress {
                        consumed: sp,
                        produced: dp - dst_pos,
                        end_of_stream: true,
                        stall: None,
                    });
                }
                Opcode::Nop => {
                    if avail < 2 {
                        break Some(LzvnStall::Source);
                    }
                    sp += 1;
                    continue;
                }
                Opcode::Undefined => {
                    return Err(OxiArcError::corrupted(
                        sp as u64,
                        format!("undefined LZVN opcode {opc:#04x}"),
                    ));
                }
                Opcode::SmallDistance => {
                    let l = usize::from(opc >> 6);
                    if avail <= 2 + l {
                        break Some(LzvnStall::Source);
                    }
                    let d = (usize::from(opc & 7) << 8) | b1();
                    (2, l, usize::from((opc >> 3) & 7) + 3, Some(d))
                }
                Opcode::PreviousDistance => {
                    let l = usize::from(opc >> 6);
                    if avail <= 1 + l {
                        break Some(LzvnStall::Source);
                    }
                    (1, l, usize::from((opc >> 3) & 7) + 3, None)
                }
                Opcode::LargeDistance => {
                    let l = usize::from(opc >> 6);
                    if avail <= 3 + l {
                        break Some(LzvnStall::Source);
                    }
                    let d = b1() | (b2() << 8);
                    (3, l, usize::from((opc >> 3) & 7) + 3, Some(d))
                }
                Opcode::MediumDistance => {
                    let l = usize::from((opc >> 3) & 3);
                    if avail <= 3 + l {
                        break Some(LzvnStall::Source);
                    }
                    let m = ((usize::from(opc & 7) << 2) | (b1() & 3)) + 3;
                    let d = (b1() >> 2) | (b2() << 6);
                    (3, l, m, Some(d))
                }
                Opcode::SmallLiteral => {
                    let l = usize::from(opc & 0xf);
                    if avail <= 1 + l {
                        break Some(LzvnStall::Source);
                    }
                    (1, l, 0, None)
                }
                Opcode::LargeLiteral => {
                    if avail <= 2 {
                        break Some(LzvnStall::Source);
                    }
                    let l = b1() + 16;
                    if avail <= 2 + l {
                        break Some(LzvnStall::Source);
                    }
                    (2, l, 0, None)
                }
                Opcode::SmallMatch => {
                    if avail <= 1 {
                        break Some(LzvnStall::Source);
                    }
                    (1, 0, usize::from(opc & 0xf), None)
                }
                Opcode::LargeMatch => {
                    if avail <= 2 {
                        break Some(LzvnStall::Source);
                    }
                    (2, 0, b1() + 16, None)
                }
            };

            sp += opc_len;
            self.pending_l = l;
            self.pending_m = m;
            self.pending_d = d.unwrap_or(self.d_prev);
            if m > 0 {
                if self.pending_d == 0 || self.pending_d > dp + l {
                    return Err(OxiArcError::invalid_distance(self.pending_d, dp + l));
                }
                self.d_prev = self.pending_d;
            }
        };

        Ok(LzvnProgress {
            consumed: sp,
            produced: dp - dst_pos,
            end_of_stream: false,
            stall,
        })
    }

    /// Copy pending literals then the pending match, as far as room allows.
    fn copy_pending(
        &mut self,
        src: &[u8],
        sp: &mut usize,
        dst: &mut [u8],
        dp: &mut usize,
    ) -> Result<Option<LzvnStall>> {
        if self.pending_l > 0 {
            let room = dst.len() - *dp;
            let available = src.len() - *sp;
            let n = self.pending_l.min(room).min(available);
            dst[*dp..*dp + n].copy_from_slice(&src[*sp..*sp + n]);
            *dp += n;
            *sp += n;
            self.pending_l -= n;
            if self.pending_l > 0 {
                return Ok(Some(if n == room {
                    LzvnStall::Destination
                } else {
                    LzvnStall::Source
                }));
            }
        }

        if self.pending_m > 0 {
            let room = dst.len() - *dp;
            let n = self.pending_m.min(room);
            let d = self.pending_d;
            if d == 0 || d > *dp {
                return Err(OxiArcError::invalid_distance(d, *dp));
            }
            for i in *dp..*dp + n {
                dst[i] = dst[i - d];
            }
            *dp += n;
            self.pending_m -= n;
            if self.pending_m > 0 {
                return Ok(Some(LzvnStall::Destination));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: [u8; 8] = [0x06, 0, 0, 0, 0, 0, 0, 0];

    fn stream(ops: &[u8]) -> Vec<u8> {
        let mut v = ops.to_vec();
        v.extend_from_slice(&EOS);
        v
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0x06), Opcode::EndOfStream);
        assert_eq!(classify(0x0e), Opcode::Nop);
        assert_eq!(classify(0x1e), Opcode::Undefined);
        assert_eq!(classify(0x3e), Opcode::Undefined);
        assert_eq!(classify(0x46), Opcode::PreviousDistance);
        assert_eq!(classify(0x07), Opcode::LargeDistance);
        assert_eq!(classify(0x08), Opcode::SmallDistance);
        assert_eq!(classify(0x70), Opcode::Undefined);
        assert_eq!(classify(0x75), Opcode::Undefined);
        assert_eq!(classify(0x7f), Opcode::Undefined);
        assert_eq!(classify(0x80), Opcode::SmallDistance);
        assert_eq!(classify(0x86), Opcode::PreviousDistance);
        assert_eq!(classify(0x88), Opcode::SmallDistance);
        assert_eq!(classify(0x90), Opcode::SmallDistance);
        assert_eq!(classify(0x9f), Opcode::LargeDistance);
        assert_eq!(classify(0xc8), Opcode::SmallDistance);
        assert_eq!(classify(0xcf), Opcode::LargeDistance);
        assert_eq!(classify(0xd0), Opcode::Undefined);
        assert_eq!(classify(0xd8), Opcode::Undefined);
        assert_eq!(classify(0xdf), Opcode::Undefined);
        assert_eq!(classify(0xa5), Opcode::MediumDistance);
        assert_eq!(classify(0xc6), Opcode::PreviousDistance);
        assert_eq!(classify(0xe0), Opcode::LargeLiteral);
        assert_eq!(classify(0xe3), Opcode::SmallLiteral);
        assert_eq!(classify(0xf0), Opcode::LargeMatch);
        assert_eq!(classify(0xff), Opcode::SmallMatch);
    }

    #[test]
    fn test_literal_and_matches() {
        // "abcd", then M=4 D=4, then M=3 at the previous distance.
        let src = stream(&[0xe4, b'a', b'b', b'c', b'd', 0x08, 0x04, 0xf3]);
        let mut dst = [0u8; 16];
        let mut decoder = LzvnDecoder::new();
        let progress = decoder.decode(&src, &mut dst, 0).unwrap();
        assert!(progress.end_of_stream);
        assert_eq!(progress.consumed, src.len());
        assert_eq!(&dst[..progress.produced], b"abcdabcdabc");
    }

    #[test]
    fn test_sml_d_with_literals() {
        // L=2 "yz", M=6, D=1.
        let src = stream(&[0x98, 0x01, b'y', b'z']);
        let mut dst = [0u8; 8];
        let progress = LzvnDecoder::new().decode(&src, &mut dst, 0).unwrap();
        assert!(progress.end_of_stream);
        assert_eq!(&dst[..progress.produced], b"yzzzzzzz");

        // L=3 "xyz", M=4, D=3.
        let src = stream(&[0xc8, 0x03, b'x', b'y', b'z']);
        let mut dst = [0u8; 7];
        let progress = LzvnDecoder::new().decode(&src, &mut dst, 0).unwrap();
        assert!(progress.end_of_stream);
        assert_eq!(&dst[..progress.produced], b"xyzxyzx");
    }

    #[test]
    fn test_two_literal_opcodes() {
        // "abcd", then 0x90: L=2 "ef", M=5, D=6; 0x86: L=2 "gh", M=3, previous D.
        let src = stream(&[
            0xe4, b'a', b'b', b'c', b'd', 0x90, 0x06, b'e', b'f', 0x86, b'g', b'h',
        ]);
        let mut dst = [0u8; 16];
        let progress = LzvnDecoder::new().decode(&src, &mut dst, 0).unwrap();
        assert!(progress.end_of_stream);
        assert_eq!(&dst[..progress.produced], b"abcdefabcdeghbcd");
    }

    #[test]
    fn test_medium_and_large_distance() {
        let mut src = vec![0xe0, 4];
        src.extend((0..20u8).map(|i| b'a' + i));
        // med_d: L=0, M=((1<<2)|2)+3 = 9, D = (0b000101 << 0) | (0 << 6) = 5.
        src.extend_from_slice(&[0xa1, (5 << 2) | 2, 0x00]);
        // lrg_d: L=0, M=3, D=20.
        src.extend_from_slice(&[0x07, 20, 0]);
        let src = stream(&src);

        let mut dst = [0u8; 32];
        let progress = LzvnDecoder::new().decode(&src, &mut dst, 0).unwrap();
        assert!(progress.end_of_stream);
        assert_eq!(progress.produced, 32);
        assert_eq!(&dst[20..29], b"pqrstpqrs");
        assert_eq!(&dst[29..32], b"jkl");
    }

    #[test]
    fn test_resume_on_small_destination() {
        let src = stream(&[0xe4, b'a', b'b', b'c', b'd', 0x08, 0x04, 0xf3]);
        let mut dst = vec![0u8; 0];
        let mut decoder = LzvnDecoder::new();
        let mut src_pos = 0;
        let mut dst_pos = 0;
        loop {
            dst.push(0);
            let progress = decoder.decode(&src[src_pos..], &mut dst, dst_pos).unwrap();
            src_pos += progress.consumed;
            dst_pos += progress.produced;
            if progress.end_of_stream {
                break;
            }
            assert_eq!(progress.stall, Some(LzvnStall::Destination));
        }
        assert_eq!(&dst[..dst_pos], b"abcdabcdabc");
    }

    #[test]
    fn test_truncated_source_stalls() {
        let src = [0xe4, b'a', b'b'];
        let mut dst = [0u8; 8];
        let progress = LzvnDecoder::new().decode(&src, &mut dst, 0).unwrap();
        assert_eq!(progress.stall, Some(LzvnStall::Source));
        assert!(!progress.end_of_stream);
        assert_eq!(progress.produced, 0);
    }

    #[test]
    fn test_invalid_opcodes_and_distances() {
        let mut dst = [0u8; 8];
        assert!(LzvnDecoder::new().decode(&stream(&[0x1e]), &mut dst, 0).is_err());
        assert!(matches!(
            LzvnDecoder::new().decode(&stream(&[0xe1, b'a', 0xd8, 0x01]), &mut dst, 0),
            Err(OxiArcError::CorruptedData { .. })
        ));
        // Match before any output.
        assert!(matches!(
            LzvnDecoder::new().decode(&stream(&[0x08, 0x01]), &mut dst, 0),
            Err(OxiArcError::InvalidDistance { .. })
        ));
        // Previous distance is still zero.
        assert!(LzvnDecoder::new().decode(&stream(&[0xe1, b'a', 0xf2]), &mut dst, 0).is_err());
    }
}

//! # OxiArc Core
//!
//! Core components shared by the OxiArc codecs.
//!
//! This crate provides the fundamental building blocks:
//!
//! - [`bitstream`]: Forward/backward bit accumulators for FSE-coded payloads
//! - [`traits`]: Buffer-oriented compression/decompression traits
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L2: Codec                                               │
//! │     LZFSE (LZ77 + FSE), LZVN block decoding             │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: BitStream (this crate)                              │
//! │     OutStream/InStream, codec traits, errors            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use oxiarc_core::bitstream::OutStream;
//!
//! let mut buf = [0u8; 4];
//! let mut pos = 0;
//! let mut out = OutStream::new();
//! out.push(0x1234, 16);
//! out.flush(&mut buf, &mut pos).unwrap();
//! assert_eq!(&buf[..pos], &[0x34, 0x12]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bitstream;
pub mod error;
pub mod traits;

// Re-exports for convenience
pub use bitstream::{InStream, OutStream};
pub use error::{OxiArcError, Result};
pub use traits::{CompressStatus, Compressor, DecompressStatus, Decompressor};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bitstream::{InStream, OutStream};
    pub use crate::error::{OxiArcError, Result};
    pub use crate::traits::{CompressStatus, Compressor, DecompressStatus, Decompressor};
}

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the weak rolling checksum and the strong digests used
//! by the Rust `zsync` implementation. The algorithms are byte-for-byte
//! compatible with upstream zsync 0.6.2 so control files produced by stock
//! `zsyncmake` remain interchangeable with this client.
//!
//! # Design
//!
//! The crate offers two halves:
//!
//! - [`WeakSum`] implements the Adler-style weak checksum (`rsum`) that the
//!   block matcher slides over seed data. Unlike rsync's variant, the second
//!   component is rolled with the outgoing byte weighted by the block size
//!   (`old << block_shift`), which is what zsync's checksum tables encode.
//! - [`strong`] exposes the MD4 block fingerprint and the SHA-1 whole-file
//!   digest as thin streaming wrappers over the RustCrypto implementations.
//!
//! # Invariants
//!
//! - Both components of [`WeakSum`] are truncated to 16 bits after every
//!   update, matching the upstream `unsigned short` arithmetic.
//! - The wire encoding stores the two components big-endian and truncated
//!   from the left; decoding a slice shorter than four bytes zero-fills the
//!   discarded high-order bytes, exactly as the control-file format does.
//! - MD4 is retained for wire compatibility; it is a fingerprint, not an
//!   integrity gate. SHA-1 is the whole-file integrity check.
//!
//! # Errors
//!
//! [`WeakSumSliceError`] reports an attempt to decode a weak sum from a slice
//! whose length is outside `1..=4` and implements [`std::error::Error`].
//!
//! # Examples
//!
//! Compute a weak sum for a block and slide the window by one byte.
//!
//! ```
//! use checksums::WeakSum;
//!
//! let block = [7u8; 2048];
//! let mut sum = WeakSum::from_block(&block);
//! // Remove the leading 7, append a 9; 2048 == 1 << 11.
//! sum.roll(7, 9, 11);
//! ```

mod rolling;
pub mod strong;

pub use rolling::{WeakSum, WeakSumSliceError, weak_a_mask};
pub use strong::{Md4, Sha1};

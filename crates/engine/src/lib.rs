#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` is the block-recovery core of the Rust zsync implementation: it
//! decides which target blocks can be recovered from local data and
//! materialises them in a scratch file, leaving a precise list of blocks
//! that must be fetched remotely.
//!
//! # Design
//!
//! The crate is built from four leaf components and one aggregate:
//!
//! - [`RangeSet`]: ordered disjoint closed intervals over block ids,
//!   recording which blocks the scratch file already holds.
//! - [`ScratchStore`]: a block-addressed random-access temporary file that
//!   becomes the target once complete.
//! - [`ChecksumIndex`]: the per-block weak/strong checksum table plus a
//!   two-level weak-hash index (bit filter in front of chained buckets)
//!   built lazily and kept in sync as blocks are recovered.
//! - the rolling matcher ([`BlockAssembly::scan_seed`]): slides a window
//!   over arbitrary seed data, probing the index at every byte offset and
//!   verifying candidates by truncated MD4.
//! - [`BlockAssembly`] owns all of the above and exposes the write paths
//!   (`scan_seed` for local data, [`BlockAssembly::submit_blocks`] for
//!   remotely fetched data) that keep them consistent.
//!
//! # Invariants
//!
//! After every public operation:
//!
//! - a block id is inside the known ranges iff its bytes in the scratch
//!   file match the target (verified by strong checksum on entry);
//! - a block id is linked into the weak-hash chains iff it is *not* inside
//!   the known ranges;
//! - `blocks still required + blocks covered by the known ranges` equals
//!   the block count.
//!
//! # Errors
//!
//! [`EngineError`] separates scratch-file failures (fatal for a session)
//! from seed-read failures (recoverable; the caller skips the seed).

mod assembly;
mod error;
mod index;
mod matcher;
mod ranges;
mod scratch;

pub use assembly::BlockAssembly;
pub use error::EngineError;
pub use index::ChecksumIndex;
pub use ranges::RangeSet;
pub use scratch::ScratchStore;

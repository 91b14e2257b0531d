#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transfer` drives a zsync download end to end: it owns the
//! [`SyncSession`] state machine that ingests local seeds, translates the
//! remaining gaps into HTTP byte ranges, validates everything a mirror
//! returns, and promotes the scratch file to the final target.
//!
//! # Design
//!
//! The crate sits above `engine` (which owns the block-level data
//! structures) and below the transports: the network is reached only
//! through the [`HttpRangeFetcher`] and [`RangeStream`] traits, so tests
//! drive sessions with in-memory fetchers and the production
//! implementation lives in the `transport` crate.
//!
//! A session's life is linear:
//!
//! 1. [`SyncSession::begin`] parses the control stream and creates the
//!    scratch file;
//! 2. [`SyncSession::submit_seed_file`] runs each seed through the rolling
//!    matcher (failures are logged and skipped);
//! 3. [`fetch_remaining`] requests the missing byte ranges from the mirror
//!    list, blacklisting failing URLs, until the assembly is complete;
//! 4. [`SyncSession::complete`] truncates to the exact length and checks
//!    the whole-file SHA-1;
//! 5. [`SyncSession::finalize`] backs up any existing target and moves the
//!    result into place, restoring the published mtime.
//!
//! # Errors
//!
//! Recoverable conditions (an unreadable seed, a failing mirror, a corrupt
//! received range) are handled internally and logged. [`SessionError`]
//! carries only the fatal ones: control-file rejection, scratch I/O, every
//! URL exhausted, target I/O during finalization.

mod error;
mod fetch;
mod receive;
mod session;

pub use error::SessionError;
pub use fetch::{
    ByteRange, FetchError, HttpRangeFetcher, MAX_RANGES_PER_REQUEST, RangeStream,
    fetch_remaining, resolve_target_urls,
};
pub use session::{ReceiveOutcome, SessionStatus, SyncSession, TransferStats, VerifyOutcome};

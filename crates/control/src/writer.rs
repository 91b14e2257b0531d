//! Control-file generation.
//!
//! The inverse of the parser: streams target data once, derives the
//! upstream parameter defaults from its size, and emits a header plus
//! packed checksum table that stock zsync clients accept. Used by the test
//! suites throughout the workspace and usable as a library entry point for
//! mirror-side tooling.

use std::io::{self, Read, Write};

use checksums::{Md4, Sha1, WeakSum};

use crate::header::CLIENT_VERSION;
use crate::params::SyncParams;

/// Options for [`write_control`].
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// `Filename` header; omitted when `None`.
    pub filename: Option<String>,
    /// `URL` headers, one line each, in order.
    pub urls: Vec<String>,
    /// Block size override; derived from the data length when `None`.
    pub block_size: Option<u32>,
    /// `MTime` header as seconds since the Unix epoch; omitted when `None`.
    pub mtime_unix: Option<i64>,
    /// `Hash-Lengths` override `(seq_matches, rsum_bytes, checksum_bytes)`;
    /// derived from the data length when `None`.
    pub hash_lengths: Option<(u8, u8, u8)>,
}

/// Emits a complete control file for `data`.
///
/// The input is buffered in memory; control generation is mirror-side
/// tooling and the dominant cost is hashing, not the copy.
///
/// Returns the parameters that were chosen so callers (tests in
/// particular) can reason about the emitted geometry.
///
/// # Errors
///
/// Returns an error when `data` is empty (the format requires a positive
/// `Length`) or when reading/writing fails.
pub fn write_control<R: Read, W: Write>(
    data: &mut R,
    opts: &WriterOptions,
    out: &mut W,
) -> Result<SyncParams, io::Error> {
    let mut buf = Vec::new();
    data.read_to_end(&mut buf)?;
    if buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot describe an empty file",
        ));
    }

    let length = buf.len() as u64;
    let block_size = opts
        .block_size
        .unwrap_or(if length < 100 << 20 { 2048 } else { 4096 });
    assert!(
        block_size.is_power_of_two(),
        "block size must be a power of two"
    );
    let (seq_matches, rsum_bytes, checksum_bytes) = opts
        .hash_lengths
        .unwrap_or_else(|| derive_hash_lengths(length, block_size));
    let params = SyncParams {
        length,
        block_size,
        seq_matches,
        rsum_bytes,
        checksum_bytes,
    };

    writeln!(out, "zsync: {CLIENT_VERSION}")?;
    if let Some(name) = &opts.filename {
        writeln!(out, "Filename: {name}")?;
    }
    if let Some(mtime) = opts.mtime_unix
        && let Some(when) = chrono::DateTime::<chrono::Utc>::from_timestamp(mtime, 0)
    {
        writeln!(out, "MTime: {}", when.to_rfc2822())?;
    }
    writeln!(out, "Blocksize: {block_size}")?;
    writeln!(out, "Length: {length}")?;
    writeln!(out, "Hash-Lengths: {seq_matches},{rsum_bytes},{checksum_bytes}")?;
    for url in &opts.urls {
        writeln!(out, "URL: {url}")?;
    }
    writeln!(out, "SHA-1: {}", hex::encode(Sha1::digest(&buf)))?;
    writeln!(out)?;

    let mut padded = vec![0u8; block_size as usize];
    for block in buf.chunks(block_size as usize) {
        let block = if block.len() == padded.len() {
            block
        } else {
            // Final short block: zero-padded for checksum purposes.
            padded.fill(0);
            padded[..block.len()].copy_from_slice(block);
            &padded
        };
        let weak = WeakSum::from_block(block).to_be_bytes();
        out.write_all(&weak[4 - rsum_bytes as usize..])?;
        out.write_all(&Md4::digest(block)[..checksum_bytes as usize])?;
    }

    Ok(params)
}

/// Upstream zsyncmake's size-based derivation of `Hash-Lengths`: enough
/// weak and strong bytes that the expected number of false matches over the
/// whole file stays negligible, halved when pairs of blocks must agree.
fn derive_hash_lengths(length: u64, block_size: u32) -> (u8, u8, u8) {
    let len = length as f64;
    let bs = f64::from(block_size);
    let seq: u8 = if length > u64::from(block_size) { 2 } else { 1 };
    let per_check = f64::from(seq) * 8.0;

    let rsum = ((len.log2() + bs.log2() - 8.6) / per_check).ceil();
    let rsum = (rsum as i64).clamp(2, 4) as u8;

    let checksum = ((20.0 + len.log2() + (1.0 + len / bs).log2()) / per_check).ceil();
    let checksum = (checksum as i64).clamp(4, 16) as u8;

    (seq, rsum, checksum)
}

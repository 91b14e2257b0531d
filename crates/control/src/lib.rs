#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `control` models the zsync control file: the newline-terminated
//! `Key: Value` header section and the packed binary table of per-block
//! checksums that follows it. The format is bit-exact with upstream zsync
//! 0.6.2, so control files produced by stock `zsyncmake` parse here and
//! files produced by [`writer`] parse with the stock client.
//!
//! # Design
//!
//! - [`ControlHeader::parse`] reads the header section and validates every
//!   recognised key. Unknown keys are rejected unless a previously seen
//!   `Safe:` line whitelisted them; the compressed-stream keys (`Z-URL`,
//!   `Z-Map2`, `Z-Filename`, `Recompress`) are always fatal because this
//!   client only handles uncompressed targets.
//! - The table decoder turns the trailing `block_count * (rsum_bytes +
//!   checksum_bytes)` bytes into [`BlockSums`] records.
//! - [`ControlFile::parse`] ties the two together over any [`BufRead`].
//! - [`writer`] is the inverse: it streams a local file once, deriving the
//!   upstream parameter defaults, and emits a complete control file.
//!
//! # Errors
//!
//! All failures surface as [`ControlError`]; see its variants for the
//! taxonomy (malformed header, unsupported feature, truncated table, ...).
//! A control file that fails to parse is never partially usable.
//!
//! # Examples
//!
//! ```
//! use std::io::Cursor;
//!
//! let mut encoded = Vec::new();
//! let opts = control::writer::WriterOptions {
//!     filename: Some("greeting.txt".into()),
//!     urls: vec!["http://mirror.example/greeting.txt".into()],
//!     ..Default::default()
//! };
//! control::writer::write_control(&mut Cursor::new(b"hello world"), &opts, &mut encoded)
//!     .unwrap();
//!
//! let parsed = control::ControlFile::parse(Cursor::new(encoded)).unwrap();
//! assert_eq!(parsed.header.filename.as_deref(), Some("greeting.txt"));
//! assert_eq!(parsed.sums.len() as u32, parsed.header.params.block_count());
//! ```

mod error;
mod header;
mod params;
mod table;
pub mod writer;

pub use error::ControlError;
pub use header::{CLIENT_VERSION, ControlHeader};
pub use params::{BlockSums, SyncParams};

use std::io::BufRead;

/// A fully parsed control file: header plus per-block checksum table.
#[derive(Clone, Debug)]
pub struct ControlFile {
    /// The parsed header section.
    pub header: ControlHeader,
    /// One checksum record per target block, in block order.
    pub sums: Vec<BlockSums>,
}

impl ControlFile {
    /// Parses a complete control stream: headers, blank separator, table.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] when the header section is invalid or the
    /// checksum table is shorter than the header promises.
    pub fn parse<R: BufRead>(mut reader: R) -> Result<Self, ControlError> {
        let header = ControlHeader::parse(&mut reader)?;
        let sums = table::read_block_sums(&mut reader, &header.params)?;
        Ok(Self { header, sums })
    }
}

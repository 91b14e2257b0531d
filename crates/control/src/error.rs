use std::io;

use crate::header::CLIENT_VERSION;

/// Errors raised while parsing or writing a control file.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A header line was not of the form `Key: Value`.
    #[error("control header line {line} is not a `Key: Value` pair")]
    MalformedLine {
        /// 1-based line number within the header section.
        line: usize,
    },

    /// A header key is unknown and was not whitelisted by a `Safe:` line.
    #[error("unrecognised control header `{0}`")]
    UnrecognisedHeader(String),

    /// The control file depends on compressed-stream support, which this
    /// client does not implement.
    #[error("control file requires unsupported feature `{0}`")]
    UnsupportedFeature(String),

    /// The file was produced by a zsync version whose output is known bad.
    #[error("control file was made by zsync {0}; that version's files are unusable")]
    ProducerRejected(String),

    /// The file demands a newer client than this one.
    #[error("control file requires client version {required} (this is {CLIENT_VERSION})")]
    VersionTooNew {
        /// The `Min-Version` value from the header.
        required: String,
    },

    /// A recognised header carried a value outside its domain.
    #[error("control header `{key}` has invalid value `{value}`")]
    InvalidValue {
        /// Header key.
        key: &'static str,
        /// Offending value, verbatim.
        value: String,
    },

    /// A header the format requires was absent.
    #[error("control file is missing the `{0}` header")]
    MissingHeader(&'static str),

    /// The binary checksum table ended before `block_count` records.
    #[error("checksum table truncated: {blocks} blocks of {record_len} bytes promised")]
    TruncatedTable {
        /// Number of blocks the header promised.
        blocks: u32,
        /// Bytes per record (`rsum_bytes + checksum_bytes`).
        record_len: u32,
    },

    /// The underlying stream failed.
    #[error("I/O error on control stream")]
    Io(#[from] io::Error),
}

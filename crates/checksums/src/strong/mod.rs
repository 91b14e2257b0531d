//! Strong digests used by the zsync wire format.
//!
//! Two algorithms appear in a control file and exactly two: MD4 truncated to
//! `checksum_bytes` per block, and an optional whole-file SHA-1. MD4 is not
//! collision-resistant; it serves as a fast fingerprint while SHA-1 is the
//! integrity gate. Both must stay as-is for compatibility with files
//! produced by stock `zsyncmake`.

mod md4;
mod sha1;

pub use md4::Md4;
pub use sha1::Sha1;

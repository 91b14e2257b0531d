use std::collections::HashSet;
use std::io::BufRead;

use tracing::{debug, warn};

use crate::error::ControlError;
use crate::params::SyncParams;

/// zsync feature level this client implements; control files whose
/// `Min-Version` exceeds it are rejected.
pub const CLIENT_VERSION: &str = "0.6.2";

/// Producer version whose control files carry a known-bad checksum layout.
const REJECTED_PRODUCER: &str = "0.0.4";

/// Headers that would require decompressing the target stream on the fly.
const COMPRESSED_STREAM_KEYS: [&str; 4] = ["Z-Filename", "Z-URL", "Z-Map2", "Recompress"];

/// Parsed header section of a control file.
#[derive(Clone, Debug)]
pub struct ControlHeader {
    /// Version of the tool that produced the file (the `zsync` key).
    pub producer_version: String,
    /// Suggested output filename; never contains a path separator.
    pub filename: Option<String>,
    /// Published modification time of the target, as seconds since the
    /// Unix epoch.
    pub mtime_unix: Option<i64>,
    /// Target URLs, absolute or relative to the control file's location, in
    /// header order.
    pub urls: Vec<String>,
    /// Whole-file SHA-1 of the target, when published.
    pub sha1: Option<[u8; 20]>,
    /// Transfer geometry and checksum widths.
    pub params: SyncParams,
}

impl ControlHeader {
    /// Reads `Key: Value` lines up to the blank separator and validates
    /// every recognised key.
    ///
    /// Keys are processed in file order; a `Safe:` line only whitelists
    /// unknown keys that appear after it, as in stock zsync.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] for malformed lines, unrecognised or
    /// unsupported keys, out-of-domain values, and missing required keys.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<Self, ControlError> {
        let mut producer_version: Option<String> = None;
        let mut filename: Option<String> = None;
        let mut mtime_unix: Option<i64> = None;
        let mut urls: Vec<String> = Vec::new();
        let mut sha1: Option<[u8; 20]> = None;
        let mut length: Option<u64> = None;
        let mut block_size: Option<u32> = None;
        let mut hash_lengths: Option<(u8, u8, u8)> = None;
        let mut safe: HashSet<String> = HashSet::new();

        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            line_no += 1;
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(ControlError::MalformedLine { line: line_no });
            };
            let value = value.strip_prefix(' ').unwrap_or(value);

            if COMPRESSED_STREAM_KEYS.contains(&key) {
                return Err(ControlError::UnsupportedFeature(key.to_owned()));
            }

            match key {
                "zsync" => {
                    if value == REJECTED_PRODUCER {
                        return Err(ControlError::ProducerRejected(value.to_owned()));
                    }
                    producer_version = Some(value.to_owned());
                }
                "Min-Version" => {
                    if value > CLIENT_VERSION {
                        return Err(ControlError::VersionTooNew {
                            required: value.to_owned(),
                        });
                    }
                }
                "Length" => {
                    length = Some(parse_positive("Length", value)?);
                }
                "Blocksize" => {
                    let bs: u64 = parse_positive("Blocksize", value)?;
                    if !bs.is_power_of_two() || u32::try_from(bs).is_err() {
                        return Err(invalid("Blocksize", value));
                    }
                    block_size = Some(bs as u32);
                }
                "Filename" => {
                    if value.contains('/') || value.is_empty() {
                        return Err(invalid("Filename", value));
                    }
                    filename = Some(value.to_owned());
                }
                "URL" => urls.push(value.to_owned()),
                "Hash-Lengths" => {
                    hash_lengths = Some(parse_hash_lengths(value)?);
                }
                "SHA-1" => {
                    if value.len() != 40 {
                        return Err(invalid("SHA-1", value));
                    }
                    let decoded =
                        hex::decode(value).map_err(|_| invalid("SHA-1", value))?;
                    let mut digest = [0u8; 20];
                    digest.copy_from_slice(&decoded);
                    sha1 = Some(digest);
                }
                "MTime" => match chrono::DateTime::parse_from_rfc2822(value) {
                    Ok(when) => mtime_unix = Some(when.timestamp()),
                    Err(err) => {
                        warn!(value, %err, "ignoring unparseable MTime header");
                    }
                },
                "Safe" => {
                    safe.extend(value.split(',').map(|k| k.trim().to_owned()));
                }
                other if safe.contains(other) => {
                    debug!(key = other, "skipping whitelisted header");
                }
                other => return Err(ControlError::UnrecognisedHeader(other.to_owned())),
            }
        }

        let producer_version =
            producer_version.ok_or(ControlError::MissingHeader("zsync"))?;
        let length = length.ok_or(ControlError::MissingHeader("Length"))?;
        let block_size = block_size.ok_or(ControlError::MissingHeader("Blocksize"))?;
        let (seq_matches, rsum_bytes, checksum_bytes) =
            hash_lengths.unwrap_or((1, 4, 16));

        if length.div_ceil(u64::from(block_size)) > u64::from(u32::MAX) {
            return Err(invalid("Length", &length.to_string()));
        }

        Ok(Self {
            producer_version,
            filename,
            mtime_unix,
            urls,
            sha1,
            params: SyncParams {
                length,
                block_size,
                seq_matches,
                rsum_bytes,
                checksum_bytes,
            },
        })
    }
}

fn invalid(key: &'static str, value: &str) -> ControlError {
    ControlError::InvalidValue {
        key,
        value: value.to_owned(),
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ControlError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value)),
    }
}

fn parse_hash_lengths(value: &str) -> Result<(u8, u8, u8), ControlError> {
    let mut parts = value.split(',').map(|p| p.trim().parse::<u8>());
    let (Some(Ok(seq)), Some(Ok(rsum)), Some(Ok(checksum)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("Hash-Lengths", value));
    };
    if !(1..=2).contains(&seq) || !(1..=4).contains(&rsum) || !(3..=16).contains(&checksum)
    {
        return Err(invalid("Hash-Lengths", value));
    }
    Ok((seq, rsum, checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn parse(text: &str) -> Result<ControlHeader, ControlError> {
        ControlHeader::parse(&mut Cursor::new(text.as_bytes()))
    }

    const MINIMAL: &str = "zsync: 0.6.2\nLength: 1000\nBlocksize: 512\n\n";

    #[test]
    fn minimal_header_parses_with_defaults() {
        let header = parse(MINIMAL).unwrap();
        assert_eq!(header.producer_version, "0.6.2");
        assert_eq!(header.params.length, 1000);
        assert_eq!(header.params.block_size, 512);
        assert_eq!(header.params.block_count(), 2);
        // Hash-Lengths defaults
        assert_eq!(header.params.seq_matches, 1);
        assert_eq!(header.params.rsum_bytes, 4);
        assert_eq!(header.params.checksum_bytes, 16);
        assert!(header.urls.is_empty());
        assert!(header.sha1.is_none());
    }

    #[test]
    fn full_header_parses() {
        let text = "zsync: 0.6.2\n\
                    Filename: target.bin\n\
                    MTime: Sat, 28 Feb 2009 00:34:45 +0000\n\
                    Blocksize: 2048\n\
                    Length: 12345\n\
                    Hash-Lengths: 2,3,5\n\
                    URL: http://example.com/target.bin\n\
                    URL: other/target.bin\n\
                    SHA-1: 0000000000000000000000000000000000000abc\n\
                    \n";
        let header = parse(text).unwrap();
        assert_eq!(header.filename.as_deref(), Some("target.bin"));
        assert_eq!(header.mtime_unix, Some(1235781285));
        assert_eq!(header.urls.len(), 2);
        assert_eq!(header.params.seq_matches, 2);
        assert_eq!(header.params.rsum_bytes, 3);
        assert_eq!(header.params.checksum_bytes, 5);
        assert_eq!(header.sha1.unwrap()[19], 0xbc);
    }

    #[test]
    fn rejects_ancient_producer() {
        let err = parse("zsync: 0.0.4\nLength: 10\nBlocksize: 512\n\n").unwrap_err();
        assert!(matches!(err, ControlError::ProducerRejected(v) if v == "0.0.4"));
    }

    #[test]
    fn rejects_future_min_version() {
        let err =
            parse("zsync: 0.6.2\nMin-Version: 0.7.0\nLength: 10\nBlocksize: 512\n\n")
                .unwrap_err();
        assert!(matches!(err, ControlError::VersionTooNew { required } if required == "0.7.0"));
    }

    #[test]
    fn accepts_old_min_version() {
        assert!(
            parse("zsync: 0.6.2\nMin-Version: 0.6.1\nLength: 10\nBlocksize: 512\n\n")
                .is_ok()
        );
    }

    #[test]
    fn rejects_compressed_stream_headers() {
        for key in COMPRESSED_STREAM_KEYS {
            let text =
                format!("zsync: 0.6.2\n{key}: x\nLength: 10\nBlocksize: 512\n\n");
            let err = parse(&text).unwrap_err();
            assert!(matches!(err, ControlError::UnsupportedFeature(k) if k == key));
        }
    }

    #[test]
    fn rejects_unknown_header_unless_safe() {
        let err = parse("zsync: 0.6.2\nX-Custom: 1\nLength: 10\nBlocksize: 512\n\n")
            .unwrap_err();
        assert!(matches!(err, ControlError::UnrecognisedHeader(k) if k == "X-Custom"));

        // Whitelisting must precede the unknown key.
        assert!(parse(
            "zsync: 0.6.2\nSafe: X-Custom,Y-Other\nX-Custom: 1\nLength: 10\nBlocksize: 512\n\n"
        )
        .is_ok());
        assert!(parse(
            "zsync: 0.6.2\nX-Custom: 1\nSafe: X-Custom\nLength: 10\nBlocksize: 512\n\n"
        )
        .is_err());
    }

    #[test]
    fn rejects_bad_values() {
        // Blocksize not a power of two
        assert!(matches!(
            parse("zsync: 0.6.2\nLength: 10\nBlocksize: 1000\n\n").unwrap_err(),
            ControlError::InvalidValue { key: "Blocksize", .. }
        ));
        // Zero length
        assert!(matches!(
            parse("zsync: 0.6.2\nLength: 0\nBlocksize: 512\n\n").unwrap_err(),
            ControlError::InvalidValue { key: "Length", .. }
        ));
        // Filename with a slash
        assert!(matches!(
            parse("zsync: 0.6.2\nFilename: a/b\nLength: 10\nBlocksize: 512\n\n")
                .unwrap_err(),
            ControlError::InvalidValue { key: "Filename", .. }
        ));
        // Hash-Lengths out of range
        for bad in ["3,4,16", "1,5,16", "1,4,17", "1,4,2", "1,4", "1,4,16,1", "x"] {
            let text =
                format!("zsync: 0.6.2\nHash-Lengths: {bad}\nLength: 10\nBlocksize: 512\n\n");
            assert!(
                matches!(
                    parse(&text).unwrap_err(),
                    ControlError::InvalidValue { key: "Hash-Lengths", .. }
                ),
                "expected rejection of {bad}"
            );
        }
        // SHA-1 with the wrong length
        assert!(matches!(
            parse("zsync: 0.6.2\nSHA-1: abcd\nLength: 10\nBlocksize: 512\n\n")
                .unwrap_err(),
            ControlError::InvalidValue { key: "SHA-1", .. }
        ));
    }

    #[test]
    fn missing_required_keys() {
        assert!(matches!(
            parse("zsync: 0.6.2\nBlocksize: 512\n\n").unwrap_err(),
            ControlError::MissingHeader("Length")
        ));
        assert!(matches!(
            parse("zsync: 0.6.2\nLength: 10\n\n").unwrap_err(),
            ControlError::MissingHeader("Blocksize")
        ));
        assert!(matches!(
            parse("Length: 10\nBlocksize: 512\n\n").unwrap_err(),
            ControlError::MissingHeader("zsync")
        ));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = parse("zsync: 0.6.2\nnot a header\n\n").unwrap_err();
        assert!(matches!(err, ControlError::MalformedLine { line: 2 }));
    }

    #[test]
    fn unparseable_mtime_is_ignored() {
        let header =
            parse("zsync: 0.6.2\nMTime: yesterday\nLength: 10\nBlocksize: 512\n\n")
                .unwrap();
        assert_eq!(header.mtime_unix, None);
    }
}

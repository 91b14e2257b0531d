//! Incremental `multipart/byteranges` parsing.
//!
//! The body is a sequence of parts, each introduced by a `--boundary`
//! line and a small header block whose `Content-Range` places the part's
//! payload in the target. Parts are streamed out in chunks; nothing is
//! buffered beyond one read.

use std::io::BufRead;

use transfer::{FetchError, RangeStream};

/// Read size for part payloads.
const CHUNK: usize = 32 * 1024;

/// Extracts the boundary token from a `Content-Type` header value, e.g.
/// `multipart/byteranges; boundary=THIS`. Quotes around the token are
/// stripped.
pub(crate) fn multipart_boundary(content_type: &str) -> Option<String> {
    let (kind, rest) = content_type.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }
    for param in rest.split(';') {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Parses `bytes S-E/TOTAL` (the value of a `Content-Range` header) into
/// `(S, E)`. The unsatisfiable form `bytes */TOTAL` yields `None`.
pub(crate) fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes ")?;
    let (range, _total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (start <= end).then_some((start, end))
}

/// Streams the parts of a `multipart/byteranges` body as
/// `(offset, payload)` chunks.
pub(crate) struct MultipartStream<R: BufRead> {
    reader: R,
    boundary: String,
    /// `(next offset, bytes remaining)` of the part being streamed.
    part: Option<(u64, u64)>,
    finished: bool,
}

impl<R: BufRead> MultipartStream<R> {
    pub(crate) fn new(reader: R, boundary: String) -> Self {
        Self {
            reader,
            boundary,
            part: None,
            finished: false,
        }
    }

    /// Reads one CRLF- (or LF-) terminated line, without its terminator.
    /// `Ok(None)` at end of stream.
    fn read_line(&mut self) -> Result<Option<String>, FetchError> {
        let mut raw = Vec::new();
        if self.reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(None);
        }
        while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
            raw.pop();
        }
        String::from_utf8(raw)
            .map(Some)
            .map_err(|_| FetchError::MalformedResponse("non-UTF-8 part header".into()))
    }

    /// Positions the stream at the next part's payload, parsing its
    /// headers. `Ok(false)` once the closing boundary has been seen.
    fn open_next_part(&mut self) -> Result<bool, FetchError> {
        let opener = format!("--{}", self.boundary);
        let closer = format!("--{}--", self.boundary);
        loop {
            let Some(line) = self.read_line()? else {
                return Err(FetchError::MalformedResponse(
                    "body ended before the closing boundary".into(),
                ));
            };
            if line == closer {
                return Ok(false);
            }
            if line == opener {
                break;
            }
            // Preamble or inter-part padding; skip.
        }

        let mut content_range = None;
        loop {
            let Some(line) = self.read_line()? else {
                return Err(FetchError::MalformedResponse(
                    "body ended inside part headers".into(),
                ));
            };
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Range")
            {
                content_range = Some(value.trim().to_owned());
            }
        }

        let content_range = content_range.ok_or_else(|| {
            FetchError::MalformedResponse("part without Content-Range".into())
        })?;
        let (start, end) = parse_content_range(&content_range).ok_or_else(|| {
            FetchError::MalformedResponse(format!(
                "unparseable Content-Range `{content_range}`"
            ))
        })?;
        self.part = Some((start, end - start + 1));
        Ok(true)
    }
}

impl<R: BufRead> RangeStream for MultipartStream<R> {
    fn next_chunk(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, FetchError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            match self.part {
                Some((_, 0)) => {
                    self.part = None;
                }
                Some((offset, remaining)) => {
                    let take = remaining.min(CHUNK as u64) as usize;
                    buf.clear();
                    buf.resize(take, 0);
                    self.reader.read_exact(buf).map_err(|_| {
                        FetchError::MalformedResponse(
                            "body ended inside a part payload".into(),
                        )
                    })?;
                    self.part = Some((offset + take as u64, remaining - take as u64));
                    return Ok(Some(offset));
                }
                None => {
                    if !self.open_next_part()? {
                        self.finished = true;
                    }
                }
            }
        }
    }
}

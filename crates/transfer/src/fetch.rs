use std::io;

use tracing::{info, warn};
use url::Url;

use crate::error::SessionError;
use crate::session::{ReceiveOutcome, SessionStatus, SyncSession};

/// Upper bound on byte ranges packed into one `Range:` header. The
/// while-incomplete driver loop issues follow-up requests for the rest.
pub const MAX_RANGES_PER_REQUEST: usize = 20;

/// A closed byte range (both ends inclusive, as in HTTP `Range` headers).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange {
    /// First byte wanted.
    pub start: u64,
    /// Last byte wanted, inclusive.
    pub end: u64,
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Failures of the HTTP collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success, non-redirect status.
    #[error("HTTP status {code}: {reason}")]
    HttpStatus {
        /// Numeric status code.
        code: u16,
        /// Status reason phrase (or best-effort description).
        reason: String,
    },

    /// A redirect response carried no `Location` header to follow.
    #[error("redirect response carried no Location header")]
    NoLocationHeader,

    /// The redirect chain exceeded the client's limit.
    #[error("more than {0} redirects")]
    TooManyRedirects(u32),

    /// The response body or headers could not be interpreted as a range
    /// response.
    #[error("malformed range response: {0}")]
    MalformedResponse(String),

    /// Connection or read failure below HTTP.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Local I/O while consuming the response.
    #[error("I/O error on response stream")]
    Io(#[from] io::Error),
}

/// One response's worth of `(offset, payload)` chunks, pulled by the
/// session so backpressure is implicit.
pub trait RangeStream {
    /// Clears `buf`, fills it with the next chunk's payload, and returns
    /// the chunk's absolute offset in the target. `Ok(None)` ends the
    /// stream.
    fn next_chunk(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, FetchError>;
}

/// The capability the session needs from an HTTP client: issue one GET
/// with a multi-range `Range:` header and stream back the returned spans.
///
/// Implementations follow `301`/`302`/`307` redirects transparently,
/// surface [`FetchError::NoLocationHeader`] when a redirect is unusable,
/// and accept both `206` (single-range or `multipart/byteranges`) and a
/// range-ignoring `200` full-body answer.
pub trait HttpRangeFetcher {
    /// Requests `ranges` of `url`.
    fn fetch_ranges(
        &mut self,
        url: &str,
        ranges: &[ByteRange],
    ) -> Result<Box<dyn RangeStream + '_>, FetchError>;
}

/// Resolves the control file's URL list against the location the control
/// file was actually fetched from (after redirects). Relative references
/// without a usable base are dropped with a warning.
#[must_use]
pub fn resolve_target_urls(raw: &[String], base: Option<&Url>) -> Vec<String> {
    raw.iter()
        .filter_map(|candidate| match Url::parse(candidate) {
            Ok(absolute) => Some(absolute.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                if let Some(joined) = base.and_then(|b| b.join(candidate).ok()) {
                    Some(joined.into())
                } else {
                    warn!(url = candidate, "no base to resolve relative target URL");
                    None
                }
            }
            Err(err) => {
                warn!(url = candidate, %err, "ignoring unparseable target URL");
                None
            }
        })
        .collect()
}

/// Drives mirrors until the session is complete or no usable URL remains.
///
/// Each round picks a random live URL and requests (a batch of) the
/// missing ranges. A transport failure or a corrupt block blacklists that
/// URL for the rest of the session; the affected blocks are re-requested
/// from the survivors.
pub fn fetch_remaining(
    session: &mut SyncSession,
    fetcher: &mut dyn HttpRangeFetcher,
    urls: &[String],
) -> Result<(), SessionError> {
    let mut alive = vec![true; urls.len()];
    let mut chunk = Vec::new();

    while session.status() != SessionStatus::Complete {
        let live: Vec<usize> = (0..urls.len()).filter(|&i| alive[i]).collect();
        if live.is_empty() {
            return Err(SessionError::AllUrlsExhausted);
        }
        let pick = live[fastrand::usize(..live.len())];
        let url = &urls[pick];

        let ranges = session.needed_byte_ranges();
        let batch = &ranges[..ranges.len().min(MAX_RANGES_PER_REQUEST)];
        info!(%url, ranges = batch.len(), todo_ranges = ranges.len(), "requesting byte ranges");
        session.reset_receive();
        session.note_request();
        let todo_before = session.blocks_todo();

        let mut usable = true;
        match fetcher.fetch_ranges(url, batch) {
            Err(err) => {
                warn!(%url, %err, "range request failed; blacklisting URL");
                usable = false;
            }
            Ok(mut stream) => loop {
                match stream.next_chunk(&mut chunk) {
                    Err(err) => {
                        warn!(%url, %err, "response stream failed; blacklisting URL");
                        usable = false;
                        break;
                    }
                    Ok(None) => {
                        if session.flush_partial()? == ReceiveOutcome::Corrupt {
                            warn!(%url, "corrupt trailing block; blacklisting URL");
                            usable = false;
                        }
                        break;
                    }
                    Ok(Some(offset)) => {
                        if session.receive_bytes(offset, &chunk)? == ReceiveOutcome::Corrupt
                        {
                            warn!(%url, "corrupt block in response; blacklisting URL");
                            usable = false;
                            break;
                        }
                    }
                }
            },
        }
        // A mirror that answers successfully without advancing the
        // transfer would otherwise be retried forever.
        if usable && session.blocks_todo() >= todo_before {
            warn!(%url, "response made no progress; blacklisting URL");
            usable = false;
        }
        if !usable {
            alive[pick] = false;
        }
    }
    Ok(())
}

use std::io::{BufReader, Read};

use tracing::debug;
use transfer::{ByteRange, FetchError, HttpRangeFetcher, RangeStream};
use url::Url;

use crate::multipart::{MultipartStream, multipart_boundary, parse_content_range};

/// Follow at most this many redirects per request.
const MAX_REDIRECTS: u32 = 5;

/// Read size for streaming response bodies into the session.
const CHUNK: usize = 32 * 1024;

/// Blocking [`HttpRangeFetcher`] over a [`ureq`] agent.
///
/// Redirects are disabled on the agent and handled here so the policy is
/// exact: `301`, `302` and `307` are followed (resolving relative
/// `Location` values), anything else is surfaced, and a redirect without
/// a `Location` header fails with [`FetchError::NoLocationHeader`].
pub struct UreqRangeFetcher {
    agent: ureq::Agent,
    referer: Option<String>,
}

impl Default for UreqRangeFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqRangeFetcher {
    /// Creates a fetcher with a fresh agent.
    #[must_use]
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .user_agent(concat!("rzsync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            referer: None,
        }
    }

    /// Sets the `Referer` sent with every request.
    #[must_use]
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    /// Issues a GET, following redirects manually. Returns the response
    /// together with the URL it finally came from.
    fn get(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<(ureq::Response, Url), FetchError> {
        let mut current = Url::parse(url)
            .map_err(|err| FetchError::Transport(format!("invalid URL {url}: {err}")))?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.agent.request_url("GET", &current);
            if let Some(range) = range {
                request = request.set("Range", range);
            }
            if let Some(referer) = &self.referer {
                request = request.set("Referer", referer);
            }

            let response = match request.call() {
                Ok(response) => response,
                Err(ureq::Error::Status(code, response)) => {
                    return Err(FetchError::HttpStatus {
                        code,
                        reason: response.status_text().to_owned(),
                    });
                }
                Err(ureq::Error::Transport(transport)) => {
                    return Err(FetchError::Transport(transport.to_string()));
                }
            };

            match response.status() {
                301 | 302 | 307 => {
                    let Some(location) = response.header("Location") else {
                        return Err(FetchError::NoLocationHeader);
                    };
                    let next = current.join(location).map_err(|err| {
                        FetchError::MalformedResponse(format!(
                            "unusable Location `{location}`: {err}"
                        ))
                    })?;
                    debug!(from = %current, to = %next, "following redirect");
                    current = next;
                }
                _ => return Ok((response, current)),
            }
        }
        Err(FetchError::TooManyRedirects(MAX_REDIRECTS))
    }

    /// Downloads a control file, following redirects, and returns its
    /// bytes together with the URL it was finally served from (the base
    /// for resolving relative target URLs).
    pub fn fetch_control(&self, url: &str) -> Result<(Vec<u8>, Url), FetchError> {
        let (response, final_url) = self.get(url, None)?;
        match response.status() {
            200 => {
                let mut body = Vec::new();
                response.into_reader().read_to_end(&mut body)?;
                Ok((body, final_url))
            }
            code => Err(FetchError::HttpStatus {
                code,
                reason: response.status_text().to_owned(),
            }),
        }
    }
}

impl HttpRangeFetcher for UreqRangeFetcher {
    fn fetch_ranges(
        &mut self,
        url: &str,
        ranges: &[ByteRange],
    ) -> Result<Box<dyn RangeStream + '_>, FetchError> {
        let header = range_header(ranges);
        let (response, _) = self.get(url, Some(&header))?;

        match response.status() {
            // Server ignored the Range header; the whole body streams from
            // offset zero and every block still verifies individually.
            200 => Ok(Box::new(BodyStream {
                reader: response.into_reader(),
                offset: 0,
            })),
            206 => {
                let content_type = response.header("Content-Type").unwrap_or_default();
                if let Some(boundary) = multipart_boundary(content_type) {
                    let reader = BufReader::new(response.into_reader());
                    Ok(Box::new(MultipartStream::new(reader, boundary)))
                } else {
                    let content_range =
                        response.header("Content-Range").ok_or_else(|| {
                            FetchError::MalformedResponse(
                                "206 without Content-Range".into(),
                            )
                        })?;
                    let (start, _) =
                        parse_content_range(content_range).ok_or_else(|| {
                            FetchError::MalformedResponse(format!(
                                "unparseable Content-Range `{content_range}`"
                            ))
                        })?;
                    Ok(Box::new(BodyStream {
                        reader: response.into_reader(),
                        offset: start,
                    }))
                }
            }
            code => Err(FetchError::HttpStatus {
                code,
                reason: response.status_text().to_owned(),
            }),
        }
    }
}

/// `Range: bytes=s-e,s-e,...` for a batch of closed ranges.
fn range_header(ranges: &[ByteRange]) -> String {
    let mut header = String::from("bytes=");
    for (i, range) in ranges.iter().enumerate() {
        if i > 0 {
            header.push(',');
        }
        header.push_str(&range.to_string());
    }
    header
}

/// A contiguous response body starting at a known target offset.
struct BodyStream {
    reader: Box<dyn Read + Send + Sync + 'static>,
    offset: u64,
}

impl RangeStream for BodyStream {
    fn next_chunk(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, FetchError> {
        buf.clear();
        buf.resize(CHUNK, 0);
        let n = self.reader.read(buf)?;
        buf.truncate(n);
        if n == 0 {
            return Ok(None);
        }
        let offset = self.offset;
        self.offset += n as u64;
        Ok(Some(offset))
    }
}

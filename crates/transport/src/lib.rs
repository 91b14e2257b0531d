#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transport` is the production HTTP implementation of the
//! [`transfer::HttpRangeFetcher`] capability: blocking ranged GETs over a
//! [`ureq`] agent, with the redirect policy implemented by hand so that a
//! redirect without a `Location` header is a first-class failure and the
//! final resolved URL is available for relative-reference resolution.
//!
//! # Design
//!
//! - [`UreqRangeFetcher`] issues one GET per batch of ranges and hands the
//!   response to one of three streams: a single-range `206` body, a
//!   `multipart/byteranges` body (parsed incrementally, one part header at
//!   a time), or a range-ignoring `200` full body starting at offset zero.
//! - [`UreqRangeFetcher::fetch_control`] downloads the control file itself
//!   and reports the post-redirect URL so target URLs can be resolved
//!   against the control file's true location.
//! - The agent is built with redirects disabled; `301`, `302` and `307`
//!   are followed manually up to a fixed limit.

mod http;
mod multipart;

pub use http::UreqRangeFetcher;

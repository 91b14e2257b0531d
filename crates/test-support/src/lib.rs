#![deny(unsafe_code)]

//! Test fixtures shared across the workspace's test suites.
//!
//! The centrepiece is [`StaticHttpServer`], a deliberately small blocking
//! HTTP/1.1 server that serves in-memory files with byte-range support
//! (single-range and `multipart/byteranges`), scripted redirects, and a
//! request log for assertions. It exists so the HTTP paths can be tested
//! hermetically; it is not a general-purpose server.

mod server;

pub use server::{RequestRecord, StaticHttpServer};

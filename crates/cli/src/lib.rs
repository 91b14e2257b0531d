#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` is the thin command-line front-end of the Rust zsync client. It
//! recognises the classic zsync switches (`-o` output, `-i` seed, `-k`
//! save the control file, `-u` referer base, plus `-q`/`-v` verbosity),
//! fetches or reads the control file, and walks one [`transfer::SyncSession`]
//! through seeding, remote fetch, verification and finalization.
//!
//! # Design
//!
//! [`run`] accepts an argument iterator together with output handles,
//! mirroring the binary's `main` one-to-one so the whole surface is
//! testable in-process. All downloading goes through
//! [`transport::UreqRangeFetcher`]; the driver adds the pieces the core
//! deliberately leaves out: output-path selection, automatic seeding from
//! an existing target and its `.part` leftover, and the end-of-run
//! summary.
//!
//! # Errors
//!
//! Failures are written to the error handle as a `rzsync: ...` line with
//! the source chain; the process exit status is `1` for runtime failures
//! and `2` for usage errors.

mod client;
mod options;

pub use client::ClientError;
pub use options::Options;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Parses arguments, runs one synchronization, and reports the outcome as
/// a process exit status: `0` on success, `1` on runtime failure, `2` on
/// usage errors.
///
/// `stdout` receives the end-of-run summary, `stderr` the diagnostics.
pub fn run<I, T>(args: I, stdout: &mut dyn Write, stderr: &mut dyn Write) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let options = match Options::try_parse_from(args) {
        Ok(options) => options,
        Err(err) => {
            // --help and --version arrive as "errors" but are successful
            // output, not usage failures.
            use clap::error::ErrorKind;
            return if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
            {
                let _ = write!(stdout, "{}", err.render());
                0
            } else {
                let _ = write!(stderr, "{}", err.render());
                2
            };
        }
    };

    init_tracing(&options);

    match client::run_client(&options, stdout) {
        Ok(()) => 0,
        Err(err) => {
            let _ = write!(stderr, "rzsync: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                let _ = write!(stderr, ": {cause}");
                source = cause.source();
            }
            let _ = writeln!(stderr);
            1
        }
    }
}

/// Maps [`run`]'s status onto a [`ExitCode`] for `main`.
#[must_use]
pub fn exit_code_from(status: u8) -> ExitCode {
    ExitCode::from(status)
}

/// Maps `-q`/`-v` to a tracing filter, overridable via `RZSYNC_LOG`.
fn init_tracing(options: &Options) {
    let default_level = match (options.quiet, options.verbose) {
        (q, _) if q > 0 => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RZSYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

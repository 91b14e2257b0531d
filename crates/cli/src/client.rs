use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use control::ControlFile;
use tracing::info;
use transfer::{
    FetchError, SessionError, SessionStatus, SyncSession, VerifyOutcome, fetch_remaining,
    resolve_target_urls,
};
use transport::UreqRangeFetcher;
use url::Url;

use crate::options::Options;

/// Driver-level failures, each with enough context for a one-line
/// diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A local control file could not be read.
    #[error("cannot read control file {path}")]
    ControlRead {
        /// The path given on the command line.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Downloading the control file failed.
    #[error("cannot download control file {url}")]
    ControlDownload {
        /// The URL given on the command line.
        url: String,
        /// Underlying HTTP failure.
        #[source]
        source: FetchError,
    },

    /// `-k` was given but the control file could not be written there.
    #[error("cannot save control file to {path}")]
    ControlSave {
        /// The `-k` path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The session failed fatally (control rejected, scratch I/O, all
    /// URLs exhausted, target replacement).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No `-o`, no `Filename` header, and no usable URL basename.
    #[error("no output filename: pass -o or use a control file with a Filename header")]
    NoOutputName,

    /// Blocks are missing but no absolute target URL could be formed.
    #[error("no usable target URL (pass -u when a saved control file has relative URLs)")]
    NoUsableUrl,

    /// The assembled file failed the whole-file SHA-1.
    #[error("verification failed; partial data kept at {part}")]
    ChecksumMismatch {
        /// Where the `.part` file was left for inspection or resume.
        part: String,
    },
}

pub(crate) fn run_client(
    options: &Options,
    stdout: &mut dyn Write,
) -> Result<(), ClientError> {
    let mut fetcher = UreqRangeFetcher::new().with_referer(options.referer.clone());

    let (control_bytes, base) = load_control(options, &fetcher)?;
    if let Some(path) = &options.save_control {
        fs::write(path, &control_bytes).map_err(|source| ClientError::ControlSave {
            path: path.display().to_string(),
            source,
        })?;
    }

    let control =
        ControlFile::parse(Cursor::new(&control_bytes)).map_err(SessionError::from)?;
    let output = choose_output(options, &control)?;
    let workdir = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut session = SyncSession::from_control(control, workdir)?;

    // Caller-supplied seeds first, then whatever a previous run left
    // behind under the output name.
    for seed in &options.seeds {
        session.submit_seed_file(seed)?;
    }
    if output.exists() {
        session.submit_seed_file(&output)?;
    }
    let part = part_path(&output);
    if part.exists() {
        session.submit_seed_file(&part)?;
    }
    session.rename_scratch(&part)?;

    if session.status() != SessionStatus::Complete {
        let urls = resolve_target_urls(session.urls(), base.as_ref());
        if urls.is_empty() {
            return Err(ClientError::NoUsableUrl);
        }
        fetch_remaining(&mut session, &mut fetcher, &urls)?;
    }

    let stats = *session.stats();
    let local_bytes = stats.seed_blocks << session.params().block_shift();
    let outcome = session.complete()?;
    if outcome == VerifyOutcome::Corrupt {
        return Err(ClientError::ChecksumMismatch {
            part: part.display().to_string(),
        });
    }
    session.finalize(&output)?;

    info!(target = %output.display(), "synchronisation finished");
    let _ = writeln!(
        stdout,
        "used {local_bytes} local, fetched {} over {} request(s)",
        stats.fetched_bytes, stats.requests
    );
    if outcome == VerifyOutcome::Unchecked {
        let _ = writeln!(
            stdout,
            "control file carries no SHA-1; whole-file integrity not verified"
        );
    }
    let _ = writeln!(stdout, "wrote {}", output.display());
    Ok(())
}

/// Obtains the control bytes plus the base URL for resolving relative
/// target references: the post-redirect control location, or `-u` for a
/// local control file.
fn load_control(
    options: &Options,
    fetcher: &UreqRangeFetcher,
) -> Result<(Vec<u8>, Option<Url>), ClientError> {
    if is_http_url(&options.control) {
        let (bytes, final_url) = fetcher.fetch_control(&options.control).map_err(
            |source| ClientError::ControlDownload {
                url: options.control.clone(),
                source,
            },
        )?;
        Ok((bytes, Some(final_url)))
    } else {
        let bytes =
            fs::read(&options.control).map_err(|source| ClientError::ControlRead {
                path: options.control.clone(),
                source,
            })?;
        let base = options
            .referer
            .as_deref()
            .and_then(|referer| Url::parse(referer).ok());
        Ok((bytes, base))
    }
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// `-o`, else the advertised `Filename`, else the alphanumeric prefix of
/// the control URL's basename.
fn choose_output(options: &Options, control: &ControlFile) -> Result<PathBuf, ClientError> {
    if let Some(path) = &options.output {
        return Ok(path.clone());
    }
    if let Some(name) = &control.header.filename {
        return Ok(PathBuf::from(name));
    }
    url_basename_prefix(&options.control)
        .map(PathBuf::from)
        .ok_or(ClientError::NoOutputName)
}

fn url_basename_prefix(control: &str) -> Option<String> {
    let basename = control
        .split(['?', '#'])
        .next()?
        .rsplit('/')
        .next()?;
    let prefix: String = basename
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect();
    (!prefix.is_empty()).then_some(prefix)
}

/// `<output>.part`, the stable name of the in-progress download.
pub(crate) fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

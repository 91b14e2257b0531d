use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use checksums::Sha1;
use control::ControlFile;
use engine::{BlockAssembly, EngineError};
use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::fetch::ByteRange;
use crate::receive::ReceiveBuffer;

/// Coarse progress of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionStatus {
    /// No block of the target is known yet.
    Empty,
    /// Some blocks are known, some still missing.
    Partial,
    /// Every block is materialised in the scratch file.
    Complete,
}

/// Result of the final whole-file verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyOutcome {
    /// The assembled file matches the published SHA-1.
    Verified,
    /// The control file published no SHA-1; the per-block checksums are
    /// the only guarantee.
    Unchecked,
    /// The assembled file does not match the published SHA-1.
    Corrupt,
}

/// Result of feeding one response chunk into the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReceiveOutcome {
    /// Every complete block in the chunk verified and was written.
    Accepted,
    /// A block failed its strong checksum; the caller should discard the
    /// rest of this response and re-request the remainder elsewhere.
    Corrupt,
}

/// Byte accounting for a finished (or failed) session.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferStats {
    /// Blocks recovered from local seeds.
    pub seed_blocks: u64,
    /// Raw bytes accepted from mirrors, before verification.
    pub fetched_bytes: u64,
    /// Ranged HTTP requests issued.
    pub requests: u64,
}

/// One zsync download: control data, block assembly, receive buffering and
/// statistics, advanced strictly from one caller at a time.
#[derive(Debug)]
pub struct SyncSession {
    filename: Option<String>,
    urls: Vec<String>,
    sha1: Option<[u8; 20]>,
    mtime_unix: Option<i64>,
    assembly: BlockAssembly,
    receiver: ReceiveBuffer,
    stats: TransferStats,
    seen_seeds: HashSet<PathBuf>,
}

impl SyncSession {
    /// Parses a control stream and opens a scratch file in `scratch_dir`.
    pub fn begin<R: BufRead>(control: R, scratch_dir: &Path) -> Result<Self, SessionError> {
        Self::from_control(ControlFile::parse(control)?, scratch_dir)
    }

    /// Builds a session from an already parsed control file.
    pub fn from_control(
        control: ControlFile,
        scratch_dir: &Path,
    ) -> Result<Self, SessionError> {
        let params = control.header.params;
        info!(
            length = params.length,
            block_size = params.block_size,
            blocks = params.block_count(),
            "starting sync session"
        );
        let assembly = BlockAssembly::new(params, control.sums, scratch_dir)?;
        Ok(Self {
            filename: control.header.filename,
            urls: control.header.urls,
            sha1: control.header.sha1,
            mtime_unix: control.header.mtime_unix,
            receiver: ReceiveBuffer::new(params.block_size),
            assembly,
            stats: TransferStats::default(),
            seen_seeds: HashSet::new(),
        })
    }

    /// Suggested output filename from the control header.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Raw target URLs from the control header (possibly relative).
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Published modification time, seconds since the Unix epoch.
    #[must_use]
    pub const fn mtime_unix(&self) -> Option<i64> {
        self.mtime_unix
    }

    /// Transfer geometry.
    #[must_use]
    pub const fn params(&self) -> &control::SyncParams {
        self.assembly.params()
    }

    /// Byte accounting so far.
    #[must_use]
    pub const fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Number of blocks still missing.
    #[must_use]
    pub fn blocks_todo(&self) -> u64 {
        self.assembly.blocks_todo()
    }

    /// Coarse progress.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if self.assembly.is_complete() {
            SessionStatus::Complete
        } else if self.assembly.is_empty() {
            SessionStatus::Empty
        } else {
            SessionStatus::Partial
        }
    }

    /// Runs one seed stream through the rolling matcher. Returns the
    /// number of blocks recovered.
    ///
    /// Seed read failures are recoverable by the caller (skip the seed);
    /// scratch failures are fatal and surface as [`SessionError`].
    pub fn submit_seed<R: std::io::Read>(&mut self, seed: R) -> Result<u64, SessionError> {
        let recovered = self.assembly.scan_seed(seed)?;
        self.stats.seed_blocks += recovered;
        Ok(recovered)
    }

    /// Opens and scans a seed file, skipping paths already offered and
    /// logging (not propagating) seed I/O failures.
    pub fn submit_seed_file(&mut self, path: &Path) -> Result<u64, SessionError> {
        if !self.seen_seeds.insert(path.to_path_buf()) {
            debug!(path = %path.display(), "seed already scanned, skipping");
            return Ok(0);
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot open seed, skipping");
                return Ok(0);
            }
        };
        match self.submit_seed(BufReader::new(file)) {
            Ok(recovered) => {
                info!(
                    path = %path.display(),
                    recovered,
                    todo = self.assembly.blocks_todo(),
                    "seed scanned"
                );
                Ok(recovered)
            }
            Err(SessionError::Engine(EngineError::Seed(err))) => {
                warn!(path = %path.display(), %err, "seed read failed, skipping");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// Moves the scratch file (typically to `<target>.part` once seeding
    /// is done, so an interrupted run can be resumed later).
    pub fn rename_scratch(&mut self, to: &Path) -> Result<(), SessionError> {
        Ok(self.assembly.rename_scratch(to)?)
    }

    /// The byte ranges still needed from a mirror: each missing block run
    /// `[lo, hi]` as the closed byte range `[lo * bs, (hi + 1) * bs - 1]`.
    /// The final range may extend past the target length; completion
    /// truncates the padding away.
    #[must_use]
    pub fn needed_byte_ranges(&self) -> Vec<ByteRange> {
        let shift = self.assembly.params().block_shift();
        self.assembly
            .missing_blocks()
            .into_iter()
            .map(|gap| ByteRange {
                start: u64::from(gap.start) << shift,
                end: (u64::from(gap.end) << shift) - 1,
            })
            .collect()
    }

    /// Discards receive buffering from a previous response stream.
    pub fn reset_receive(&mut self) {
        self.receiver.reset();
    }

    /// Records that a ranged request is about to be issued.
    pub fn note_request(&mut self) {
        self.stats.requests += 1;
    }

    /// Feeds one `(offset, payload)` chunk of a range response into the
    /// verify-and-write path. A zero-length chunk at the buffered offset
    /// flushes a trailing partial block.
    pub fn receive_bytes(
        &mut self,
        offset: u64,
        chunk: &[u8],
    ) -> Result<ReceiveOutcome, SessionError> {
        self.stats.fetched_bytes += chunk.len() as u64;
        let clean = self.receiver.receive(&mut self.assembly, offset, chunk)?;
        Ok(if clean {
            ReceiveOutcome::Accepted
        } else {
            ReceiveOutcome::Corrupt
        })
    }

    /// Flushes a buffered trailing partial block, if any, by zero-padding
    /// it to a whole block.
    pub fn flush_partial(&mut self) -> Result<ReceiveOutcome, SessionError> {
        match self.receiver.pending_offset() {
            Some(offset) => self.receive_bytes(offset, &[]),
            None => Ok(ReceiveOutcome::Accepted),
        }
    }

    /// Truncates the scratch file to the exact target length and verifies
    /// the whole-file SHA-1 when the control file published one.
    pub fn complete(&mut self) -> Result<VerifyOutcome, SessionError> {
        self.assembly.truncate_scratch()?;
        let Some(expected) = self.sha1 else {
            info!("no whole-file SHA-1 published; skipping final verification");
            return Ok(VerifyOutcome::Unchecked);
        };

        let length = self.assembly.params().length;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut offset = 0u64;
        while offset < length {
            let take = (length - offset).min(buf.len() as u64) as usize;
            self.assembly.read_bytes(offset, &mut buf[..take])?;
            hasher.update(&buf[..take]);
            offset += take as u64;
        }

        if hasher.finalize() == expected {
            info!("whole-file SHA-1 verified");
            Ok(VerifyOutcome::Verified)
        } else {
            warn!("assembled file fails its whole-file SHA-1");
            Ok(VerifyOutcome::Corrupt)
        }
    }

    /// Promotes the scratch file to `target`: any existing file is kept as
    /// `<target>.zs-old` (hard link preferred, rename as fallback), the
    /// scratch moves into place, and the published mtime is restored.
    pub fn finalize(self, target: &Path) -> Result<(), SessionError> {
        let mtime_unix = self.mtime_unix;
        let scratch_path = self.assembly.detach_scratch()?;

        if target.exists() {
            let mut backup = target.as_os_str().to_owned();
            backup.push(".zs-old");
            let backup = PathBuf::from(backup);
            let _ = fs::remove_file(&backup);
            if fs::hard_link(target, &backup).is_err() {
                fs::rename(target, &backup).map_err(SessionError::TargetIo)?;
            }
            debug!(backup = %backup.display(), "kept previous target");
        }
        fs::rename(&scratch_path, target).map_err(SessionError::TargetIo)?;

        if let Some(secs) = mtime_unix {
            let stamp = FileTime::from_unix_time(secs, 0);
            if let Err(err) = filetime::set_file_mtime(target, stamp) {
                warn!(%err, "could not restore published modification time");
            }
        }
        info!(target = %target.display(), "target file in place");
        Ok(())
    }
}

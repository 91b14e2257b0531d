use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Block-addressed random-access byte store backed by a temporary file.
///
/// The file is created with a random-suffix name in a caller-supplied
/// directory and unlinked on drop unless [`detach`](Self::detach) was
/// called. Writes beyond the current end of file are allowed (the file is
/// sparse until completion); a final [`truncate`](Self::truncate) pins the
/// exact target length.
#[derive(Debug)]
pub struct ScratchStore {
    file: File,
    path: PathBuf,
    block_shift: u8,
    delete_on_drop: bool,
}

impl ScratchStore {
    /// Creates a fresh scratch file inside `dir`.
    pub fn create_in(dir: &Path, block_shift: u8) -> io::Result<Self> {
        let tmp = tempfile::Builder::new()
            .prefix("rzsync-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        let (file, path) = tmp.keep().map_err(|err| err.error)?;
        debug!(path = %path.display(), "created scratch file");
        Ok(Self {
            file,
            path,
            block_shift,
            delete_on_drop: true,
        })
    }

    /// Current location of the scratch file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the blocks `lo..=hi` from the front of `data` at their
    /// block-aligned positions. `len` bounds the write so padding past the
    /// end of the target is never persisted.
    pub fn write_blocks(
        &mut self,
        lo: u32,
        hi: u32,
        data: &[u8],
        len_limit: u64,
    ) -> io::Result<()> {
        let offset = u64::from(lo) << self.block_shift;
        let mut count = (u64::from(hi - lo) + 1) << self.block_shift;
        if offset + count > len_limit {
            count = len_limit - offset;
        }
        self.write_bytes(offset, &data[..count as usize])
    }

    /// Writes `data` at an arbitrary byte offset.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    /// Moves the scratch file to `to` (same filesystem), keeping it open.
    ///
    /// A renamed scratch has been promised to the caller under a stable
    /// name (the `.part` file), so it survives drop: an aborted session
    /// leaves it behind to be offered as a seed by a later run.
    pub fn rename(&mut self, to: &Path) -> io::Result<()> {
        fs::rename(&self.path, to)?;
        debug!(from = %self.path.display(), to = %to.display(), "renamed scratch file");
        self.path = to.to_path_buf();
        self.delete_on_drop = false;
        Ok(())
    }

    /// Sets the file to exactly `len` bytes, dropping any write-hole tail.
    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    /// Flushes and keeps the file on disk, returning its path. The caller
    /// takes ownership of the directory entry.
    pub fn detach(mut self) -> io::Result<PathBuf> {
        self.file.sync_all()?;
        self.delete_on_drop = false;
        Ok(self.path.clone())
    }
}

impl Drop for ScratchStore {
    fn drop(&mut self) {
        if self.delete_on_drop {
            // Nothing useful to do about a failing unlink during cleanup.
            let _ = fs::remove_file(&self.path);
        }
    }
}

use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};

use checksums::Md4;
use control::{BlockSums, SyncParams};
use tracing::warn;

use crate::error::EngineError;
use crate::index::ChecksumIndex;
use crate::matcher;
use crate::ranges::RangeSet;
use crate::scratch::ScratchStore;

/// The partially assembled target: checksum index, known-range
/// bookkeeping and scratch file, kept consistent through every write path.
///
/// All recovery flows through [`write_blocks`](Self::write_blocks), which
/// persists the data, unlinks the blocks from the weak-hash chains and
/// extends the known ranges in one step.
#[derive(Debug)]
pub struct BlockAssembly {
    params: SyncParams,
    index: ChecksumIndex,
    ranges: RangeSet,
    scratch: ScratchStore,
}

impl BlockAssembly {
    /// Creates an assembly for a parsed checksum table, with its scratch
    /// file in `scratch_dir`.
    pub fn new(
        params: SyncParams,
        sums: Vec<BlockSums>,
        scratch_dir: &Path,
    ) -> Result<Self, EngineError> {
        let scratch = ScratchStore::create_in(scratch_dir, params.block_shift())
            .map_err(EngineError::Scratch)?;
        Ok(Self {
            params,
            index: ChecksumIndex::new(params, sums),
            ranges: RangeSet::new(),
            scratch,
        })
    }

    /// Transfer geometry.
    #[must_use]
    pub const fn params(&self) -> &SyncParams {
        &self.params
    }

    /// Blocks already materialised, as disjoint closed intervals.
    #[must_use]
    pub const fn known_ranges(&self) -> &RangeSet {
        &self.ranges
    }

    /// Number of blocks still missing.
    #[must_use]
    pub fn blocks_todo(&self) -> u64 {
        u64::from(self.params.block_count()) - self.ranges.covered()
    }

    /// Whether every block is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.blocks_todo() == 0
    }

    /// Whether no block is present yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The smallest known block id `>= bid`, or the block count when
    /// nothing known follows.
    #[must_use]
    pub fn next_known(&self, bid: u32) -> u32 {
        self.ranges
            .next_known(bid)
            .unwrap_or_else(|| self.params.block_count())
    }

    /// The block ids still missing, as ascending half-open ranges.
    #[must_use]
    pub fn missing_blocks(&self) -> Vec<Range<u32>> {
        self.ranges.complement(0..self.params.block_count())
    }

    pub(crate) const fn index(&self) -> &ChecksumIndex {
        &self.index
    }

    pub(crate) const fn index_mut(&mut self) -> &mut ChecksumIndex {
        &mut self.index
    }

    /// Builds the weak-hash index if absent, excluding blocks already
    /// recovered.
    pub fn ensure_index(&mut self) {
        self.index.ensure_built(&self.ranges);
    }

    /// Replaces the checksum record for one block, invalidating any built
    /// index.
    pub fn set_block_sums(&mut self, bid: u32, sums: BlockSums) {
        self.index.set_sums(bid, sums);
    }

    /// Persists blocks `lo..=hi` from the front of `data` and updates the
    /// index and known ranges to match.
    pub fn write_blocks(&mut self, lo: u32, hi: u32, data: &[u8]) -> Result<(), EngineError> {
        self.scratch
            .write_blocks(lo, hi, data, self.params.length)
            .map_err(EngineError::Scratch)?;
        for bid in lo..=hi {
            self.index.remove(bid);
            self.ranges.insert(bid);
        }
        Ok(())
    }

    /// Verifies and writes a run of remotely fetched blocks.
    ///
    /// `data` must hold `(hi - lo + 1)` full blocks, the final one
    /// zero-padded if it is the target's short tail. Every block's strong
    /// sum is checked before anything is persisted from it; on the first
    /// mismatch the verified prefix is written and `Ok(false)` returned so
    /// the caller can discard the rest of the response and re-request the
    /// remainder elsewhere.
    pub fn submit_blocks(
        &mut self,
        lo: u32,
        hi: u32,
        data: &[u8],
    ) -> Result<bool, EngineError> {
        let block_size = self.params.block_size as usize;
        for (i, bid) in (lo..=hi).enumerate() {
            let digest = Md4::digest(&data[i * block_size..(i + 1) * block_size]);
            if !self
                .index
                .sums_at(bid)
                .strong_matches(&digest, self.params.checksum_bytes)
            {
                warn!(block = bid, "received block fails its strong checksum");
                if bid > lo {
                    self.write_blocks(lo, bid - 1, data)?;
                }
                return Ok(false);
            }
        }
        self.write_blocks(lo, hi, data)?;
        Ok(true)
    }

    /// Scans a seed stream for target blocks at any byte offset, writing
    /// every verified hit. Returns the number of blocks recovered.
    pub fn scan_seed<R: Read>(&mut self, seed: R) -> Result<u64, EngineError> {
        matcher::scan_seed(self, seed)
    }

    /// Reads assembled bytes back out of the scratch file.
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), EngineError> {
        self.scratch
            .read_bytes(offset, buf)
            .map_err(EngineError::Scratch)
    }

    /// Current scratch path.
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Moves the scratch file (same filesystem), keeping it open.
    pub fn rename_scratch(&mut self, to: &Path) -> Result<(), EngineError> {
        self.scratch.rename(to).map_err(EngineError::Scratch)
    }

    /// Truncates the scratch file to the exact target length.
    pub fn truncate_scratch(&mut self) -> Result<(), EngineError> {
        self.scratch
            .truncate(self.params.length)
            .map_err(EngineError::Scratch)
    }

    /// Consumes the assembly, leaving the scratch file on disk, and
    /// returns its path.
    pub fn detach_scratch(self) -> Result<PathBuf, EngineError> {
        self.scratch.detach().map_err(EngineError::Scratch)
    }
}

use engine::{BlockAssembly, EngineError};
use tracing::debug;

/// Re-blocking buffer between a mirror's byte stream and the verified
/// block writes of the assembly.
///
/// Responses arrive as arbitrarily sized chunks at arbitrary (but
/// internally contiguous) offsets; blocks must be verified whole. One
/// block of buffer is enough: a chunk's unaligned head can only be used if
/// it continues the buffered tail of the previous chunk, and its own tail
/// is buffered for the next call.
#[derive(Debug)]
pub(crate) struct ReceiveBuffer {
    partial: Vec<u8>,
    /// Absolute offset of the byte that would extend the buffered data;
    /// block-aligned whenever nothing is buffered.
    expected: u64,
}

impl ReceiveBuffer {
    pub(crate) fn new(block_size: u32) -> Self {
        Self {
            partial: vec![0u8; block_size as usize],
            expected: 0,
        }
    }

    /// Forgets any buffered partial block; used when a new response stream
    /// starts.
    pub(crate) fn reset(&mut self) {
        self.expected = 0;
    }

    /// Offset a zero-length flush call must use to complete the buffered
    /// tail, if one is buffered.
    pub(crate) fn pending_offset(&self) -> Option<u64> {
        let block_size = self.partial.len() as u64;
        (self.expected % block_size != 0).then_some(self.expected)
    }

    /// Feeds one response chunk. A zero-length chunk at the buffered
    /// offset zero-pads and submits the trailing partial block.
    ///
    /// Returns `false` when any block in the chunk failed its strong
    /// checksum (the verified prefix is still kept).
    pub(crate) fn receive(
        &mut self,
        assembly: &mut BlockAssembly,
        mut offset: u64,
        mut data: &[u8],
    ) -> Result<bool, EngineError> {
        let block_size = self.partial.len();
        let bs = block_size as u64;
        let mut clean = true;

        if offset % bs != 0 {
            let in_block = (offset % bs) as usize;
            let want = block_size - in_block;
            if self.expected == offset {
                let take = if data.is_empty() {
                    // Explicit flush: the target ends inside this block;
                    // pad it out so the (padded) strong sum can verify.
                    self.partial[in_block..].fill(0);
                    want
                } else {
                    let take = want.min(data.len());
                    self.partial[in_block..in_block + take].copy_from_slice(&data[..take]);
                    take
                };
                self.expected = offset + take as u64;
                if self.expected % bs == 0 {
                    let bid = ((offset - in_block as u64) / bs) as u32;
                    clean &= assembly.submit_blocks(bid, bid, &self.partial)?;
                }
                data = data.get(take.min(data.len())..).unwrap_or(&[]);
                offset += take as u64;
            } else {
                // Not a continuation: the head of this block is missing,
                // so the fragment is unusable.
                debug!(offset, "discarding unaligned response fragment");
                let take = want.min(data.len());
                data = &data[take..];
                offset += take as u64;
            }
        }

        // Whole blocks straight from the chunk.
        let whole = data.len() - data.len() % block_size;
        if whole > 0 {
            let lo = (offset / bs) as u32;
            let hi = lo + (whole / block_size) as u32 - 1;
            let block_count = assembly.params().block_count();
            if lo < block_count {
                let hi = hi.min(block_count - 1);
                let usable = (u64::from(hi - lo) + 1) as usize * block_size;
                clean &= assembly.submit_blocks(lo, hi, &data[..usable])?;
            }
            data = &data[whole..];
            offset += whole as u64;
        }

        // Buffer any tail for the next chunk.
        if !data.is_empty() {
            self.partial[..data.len()].copy_from_slice(data);
            self.expected = offset + data.len() as u64;
        }

        Ok(clean)
    }
}

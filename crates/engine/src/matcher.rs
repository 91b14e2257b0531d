use std::io::{self, Read};

use checksums::{Md4, WeakSum};
use tracing::trace;

use crate::assembly::BlockAssembly;
use crate::error::EngineError;

/// Streams a seed through a sliding-window scan, writing every recognised
/// target block into the assembly.
///
/// The buffer holds sixteen blocks plus one window of context; each refill
/// copies the final context bytes to the front so matches spanning the
/// refill boundary are still seen, and at end of input the tail is
/// zero-padded by one context so the final (padded) target block can
/// match.
pub(crate) fn scan_seed<R: Read>(
    assembly: &mut BlockAssembly,
    mut seed: R,
) -> Result<u64, EngineError> {
    assembly.ensure_index();

    let params = *assembly.params();
    let block_size = params.block_size as usize;
    let context = params.context();
    let data_capacity = 16 * block_size + context;

    let mut buf = vec![0u8; data_capacity + context];
    let mut scan = Scan {
        window: [WeakSum::default(); 2],
        next_match: None,
        next_known: 0,
        skip: 0,
        recovered: 0,
    };

    let mut valid = 0usize;
    let mut fresh = true;
    let mut exhausted = false;
    while !exhausted {
        let read = if fresh {
            let n = read_full(&mut seed, &mut buf[..data_capacity])
                .map_err(EngineError::Seed)?;
            valid = n;
            n
        } else {
            buf.copy_within(valid - context..valid, 0);
            let n = read_full(&mut seed, &mut buf[context..data_capacity])
                .map_err(EngineError::Seed)?;
            valid = context + n;
            n
        };
        exhausted = valid < data_capacity || read == 0;
        if exhausted {
            // Zero-pad one window of context so a final short block can
            // complete.
            buf[valid..valid + context].fill(0);
            valid += context;
        }
        scan.run(assembly, &buf[..valid], fresh)?;
        fresh = false;
    }
    Ok(scan.recovered)
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Rolling-scan state carried across buffer refills.
struct Scan {
    /// Weak sums of the current window and, under sequential matching, of
    /// the window one block further on.
    window: [WeakSum; 2],
    /// Target block expected to follow the previous hit; probed alone
    /// before any hash lookup.
    next_match: Option<u32>,
    /// Cached next already-known block for the `next_match` fast path.
    next_known: u32,
    /// Window position to resume at after a refill, set when a hit moved
    /// the window past the usable end of the buffer.
    skip: usize,
    /// Total blocks written so far.
    recovered: u64,
}

impl Scan {
    /// Scans one buffer of seed data. `data` always holds at least one
    /// window of context beyond every position examined.
    fn run(
        &mut self,
        assembly: &mut BlockAssembly,
        data: &[u8],
        fresh: bool,
    ) -> Result<(), EngineError> {
        let params = *assembly.params();
        let block_size = params.block_size as usize;
        let block_shift = params.block_shift();
        let context = params.context();
        let sequential = params.seq_matches > 1;

        let mut x = if fresh {
            self.next_match = None;
            0
        } else {
            self.skip
        };
        if (x > 0 || fresh) && x + context <= data.len() {
            self.window[0] = WeakSum::from_block(&data[x..x + block_size]);
            if sequential {
                self.window[1] =
                    WeakSum::from_block(&data[x + block_size..x + 2 * block_size]);
            }
        }
        self.skip = 0;

        loop {
            if x + context >= data.len() {
                return Ok(());
            }

            let mut written = 0u32;
            let mut advance_blocks = 0u32;

            // A previous hit predicts the very next target block; test that
            // single candidate before any hash lookup.
            if let Some(predicted) = self.next_match {
                written = self.check_chain(assembly, predicted, &data[x..], true)?;
                if written > 0 {
                    advance_blocks = 1;
                }
            }
            if written == 0 {
                let hash = assembly
                    .index()
                    .hash_of_window(self.window[0], self.window[1]);
                if assembly.index().bit_hit(hash)
                    && let Some(head) = assembly.index().bucket_head(hash)
                {
                    written = self.check_chain(assembly, head, &data[x..], false)?;
                    if written > 0 {
                        advance_blocks = u32::from(params.seq_matches);
                    }
                }
            }
            self.recovered += u64::from(written);

            if advance_blocks > 0 {
                // A hit at x makes another match before the next block
                // boundary implausible; jump the full verified span.
                x += block_size * advance_blocks as usize;
                if x + context > data.len() {
                    self.skip = x + context - data.len();
                    return Ok(());
                }
                if sequential && advance_blocks == 1 {
                    self.window[0] = self.window[1];
                } else {
                    self.window[0] = WeakSum::from_block(&data[x..x + block_size]);
                }
                if sequential {
                    self.window[1] =
                        WeakSum::from_block(&data[x + block_size..x + 2 * block_size]);
                }
                continue;
            }

            // No hit: slide the window a single byte.
            let outgoing = data[x];
            let incoming = data[x + block_size];
            self.window[0].roll(outgoing, incoming, block_shift);
            if sequential {
                self.window[1].roll(incoming, data[x + 2 * block_size], block_shift);
            }
            x += 1;
        }
    }

    /// Walks a hash chain (or probes the single predicted entry when
    /// `only_one`), verifying weak then strong sums, and writes every
    /// accepted run of blocks. Returns the number of blocks written.
    fn check_chain(
        &mut self,
        assembly: &mut BlockAssembly,
        start: u32,
        window: &[u8],
        only_one: bool,
    ) -> Result<u32, EngineError> {
        let params = *assembly.params();
        let block_size = params.block_size as usize;
        let block_count = params.block_count();
        let a_mask = params.a_mask();
        let seq = usize::from(params.seq_matches);

        // The strong sums of the window's blocks, computed at most once
        // however many chain entries are examined.
        let mut digests: [Option<[u8; 16]>; 2] = [None, None];
        let mut written_total = 0u32;

        assembly.index_mut().start_rover(start);
        while let Some(candidate) = assembly.index_mut().advance_rover(only_one) {
            if !self.window[0]
                .matches_truncated(assembly.index().sums_at(candidate).weak, a_mask)
            {
                continue;
            }
            if !only_one
                && seq > 1
                && !self.window[1].matches_truncated(
                    assembly.index().sums_at(candidate + 1).weak,
                    a_mask,
                )
            {
                continue;
            }

            // All checked strong sums must agree for the run to be
            // accepted.
            let mut accepted = true;
            let mut checked = 0usize;
            loop {
                let digest = digests[checked].get_or_insert_with(|| {
                    Md4::digest(&window[checked * block_size..(checked + 1) * block_size])
                });
                if !assembly
                    .index()
                    .sums_at(candidate + checked as u32)
                    .strong_matches(digest, params.checksum_bytes)
                {
                    accepted = false;
                }
                checked += 1;
                if !(accepted && !only_one && checked < seq) {
                    break;
                }
            }
            if !accepted {
                continue;
            }

            let run_end = candidate + checked as u32;
            let next_known = if only_one {
                self.next_known
            } else {
                assembly.next_known(candidate)
            };

            let write_count = if next_known > run_end {
                // Nothing known ahead: keep the run alive for the
                // follow-on probe.
                self.next_match = (run_end < block_count).then_some(run_end);
                if !only_one {
                    self.next_known = next_known;
                }
                checked as u32
            } else {
                // The run abuts data we already have; write only the gap.
                self.next_match = None;
                next_known - candidate
            };

            if write_count > 0 {
                trace!(
                    block = candidate,
                    count = write_count,
                    "seed window matched target blocks"
                );
                assembly.write_blocks(candidate, candidate + write_count - 1, window)?;
                written_total += write_count;
            }
        }
        Ok(written_total)
    }
}

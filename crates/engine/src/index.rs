use checksums::WeakSum;
use control::{BlockSums, SyncParams};
use tracing::debug;

use crate::ranges::RangeSet;

/// Number of low-order hash bits that address within one bit-filter byte
/// group; the bit filter is eight times larger than the bucket table.
const BITHASH_BITS: u32 = 3;

/// Per-block checksum records plus a lazily built two-level weak-hash
/// index.
///
/// The records are stationary for the life of a session; the hash chains
/// over them are rebuilt on demand and shrink as blocks are recovered. A
/// coarse bit filter sits in front of the chained buckets so the matcher
/// can reject most window positions without touching a chain.
#[derive(Debug)]
pub struct ChecksumIndex {
    params: SyncParams,
    sums: Vec<BlockSums>,
    tables: Option<Tables>,
}

#[derive(Debug)]
struct Tables {
    hash_mask: u32,
    bit_mask: u32,
    /// Head block id of each bucket's chain.
    buckets: Vec<Option<u32>>,
    /// Chain link per block id; `None` terminates a chain and also marks
    /// unlinked blocks.
    next: Vec<Option<u32>>,
    /// One bit per `bit_mask`-indexed slot; conservative (never a false
    /// negative, false positives allowed and never cleared).
    bits: Vec<u8>,
    /// Cursor of an in-progress chain walk; repaired by `remove` so the
    /// matcher may unlink the very entry it is visiting.
    rover: Option<u32>,
}

impl ChecksumIndex {
    /// Wraps the parsed checksum table. No index is built yet.
    #[must_use]
    pub fn new(params: SyncParams, sums: Vec<BlockSums>) -> Self {
        Self {
            params,
            sums,
            tables: None,
        }
    }

    /// The checksum record for `bid`; block ids at or past the end of the
    /// table yield the zeroed padding record that sequential matching
    /// probes past the final block.
    #[must_use]
    pub fn sums_at(&self, bid: u32) -> BlockSums {
        self.sums.get(bid as usize).copied().unwrap_or_default()
    }

    /// Whether the hash tables currently exist.
    #[must_use]
    pub const fn is_built(&self) -> bool {
        self.tables.is_some()
    }

    /// Replaces the record for `bid`, wiping any built index; the next
    /// probe rebuilds it.
    pub fn set_sums(&mut self, bid: u32, sums: BlockSums) {
        self.sums[bid as usize] = sums;
        self.invalidate();
    }

    /// Drops the hash tables.
    pub fn invalidate(&mut self) {
        self.tables = None;
    }

    /// Weak hash combining a block's own sum with its successor's, exactly
    /// as the probe side combines the two rolling window sums.
    fn hash_of_pair(&self, first: WeakSum, second: WeakSum) -> u32 {
        let mixed = if self.params.seq_matches > 1 {
            u32::from(second.b())
        } else {
            u32::from(first.a() & self.params.a_mask())
        };
        u32::from(first.b()) ^ (mixed << BITHASH_BITS)
    }

    /// Weak hash of the stored record for `bid`.
    fn hash_of_block(&self, bid: u32) -> u32 {
        self.hash_of_pair(self.sums_at(bid).weak, self.sums_at(bid + 1).weak)
    }

    /// Weak hash of the matcher's current pair of rolling sums.
    #[must_use]
    pub fn hash_of_window(&self, first: WeakSum, second: WeakSum) -> u32 {
        self.hash_of_pair(first, second)
    }

    /// Builds the hash tables if absent. Blocks already inside `known` are
    /// left out of the chains so recovered data is never re-matched.
    pub fn ensure_built(&mut self, known: &RangeSet) {
        if self.tables.is_some() {
            return;
        }
        let blocks = self.params.block_count();

        // Bucket count: smallest power of two (>= 32) that is at least the
        // block count, capped at 2^17 slots.
        let mut k: u32 = 16;
        while (2u64 << (k - 1)) > u64::from(blocks) && k > 4 {
            k -= 1;
        }
        let hash_mask = (2u32 << k) - 1;
        let bit_mask = (hash_mask << BITHASH_BITS) | ((1 << BITHASH_BITS) - 1);

        let mut tables = Tables {
            hash_mask,
            bit_mask,
            buckets: vec![None; hash_mask as usize + 1],
            next: vec![None; blocks as usize],
            bits: vec![0u8; (bit_mask as usize >> 3) + 1],
            rover: None,
        };

        // Reverse iteration keeps each chain in ascending block order.
        for bid in (0..blocks).rev() {
            if known.contains(bid) {
                continue;
            }
            let hash = self.hash_of_block(bid);
            let slot = (hash & hash_mask) as usize;
            tables.next[bid as usize] = tables.buckets[slot];
            tables.buckets[slot] = Some(bid);
            tables.bits[((hash & bit_mask) >> 3) as usize] |= 1 << (hash & 7);
        }

        debug!(blocks, buckets = hash_mask + 1, "built weak-hash index");
        self.tables = Some(tables);
    }

    /// Fast negative probe: `false` guarantees no chain contains the hash.
    #[must_use]
    pub fn bit_hit(&self, hash: u32) -> bool {
        self.tables.as_ref().is_some_and(|t| {
            t.bits[((hash & t.bit_mask) >> 3) as usize] & (1 << (hash & 7)) != 0
        })
    }

    /// Head of the bucket chain for `hash`, if any.
    #[must_use]
    pub fn bucket_head(&self, hash: u32) -> Option<u32> {
        let t = self.tables.as_ref()?;
        t.buckets[(hash & t.hash_mask) as usize]
    }

    /// Successor of `bid` in its chain.
    #[must_use]
    pub fn chain_next(&self, bid: u32) -> Option<u32> {
        let t = self.tables.as_ref()?;
        t.next.get(bid as usize).copied().flatten()
    }

    /// Positions the chain cursor at `head` for a fresh walk.
    pub fn start_rover(&mut self, head: u32) {
        if let Some(t) = &mut self.tables {
            t.rover = Some(head);
        }
    }

    /// Returns the entry under the cursor and advances it: to the chain
    /// successor, or to nothing when `only_one` limits the walk to a single
    /// probe.
    pub fn advance_rover(&mut self, only_one: bool) -> Option<u32> {
        let current = self.tables.as_ref()?.rover?;
        let following = if only_one {
            None
        } else {
            self.chain_next(current)
        };
        if let Some(t) = &mut self.tables {
            t.rover = following;
        }
        Some(current)
    }

    /// Unlinks `bid` from its chain. A no-op while the index is unbuilt or
    /// when the block was already unlinked; the bit filter is deliberately
    /// left set.
    pub fn remove(&mut self, bid: u32) {
        if self.tables.is_none() {
            return;
        }
        let hash = self.hash_of_block(bid);
        let t = self.tables.as_mut().expect("tables checked above");
        if t.rover == Some(bid) {
            t.rover = t.next[bid as usize];
        }

        let slot = (hash & t.hash_mask) as usize;
        let mut cursor = t.buckets[slot];
        if cursor == Some(bid) {
            t.buckets[slot] = t.next[bid as usize];
            t.next[bid as usize] = None;
            return;
        }
        while let Some(here) = cursor {
            let following = t.next[here as usize];
            if following == Some(bid) {
                t.next[here as usize] = t.next[bid as usize];
                t.next[bid as usize] = None;
                return;
            }
            cursor = following;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(blocks: u32, seq_matches: u8) -> SyncParams {
        SyncParams {
            length: u64::from(blocks) * 64,
            block_size: 64,
            seq_matches,
            rsum_bytes: 4,
            checksum_bytes: 16,
        }
    }

    fn index_of(weaks: &[(u16, u16)], seq_matches: u8) -> ChecksumIndex {
        let sums = weaks
            .iter()
            .map(|&(a, b)| BlockSums::new(WeakSum::new(a, b), &[0u8; 16]))
            .collect::<Vec<_>>();
        ChecksumIndex::new(params(weaks.len() as u32, seq_matches), sums)
    }

    #[test]
    fn chains_are_in_ascending_block_order() {
        // All blocks share one weak sum, hence one bucket.
        let mut index = index_of(&[(1, 2); 5], 1);
        index.ensure_built(&RangeSet::new());

        let hash = index.hash_of_block(0);
        assert!(index.bit_hit(hash));
        let mut walk = Vec::new();
        let mut cursor = index.bucket_head(hash);
        while let Some(bid) = cursor {
            walk.push(bid);
            cursor = index.chain_next(bid);
        }
        assert_eq!(walk, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn bit_filter_rejects_absent_hashes() {
        let mut index = index_of(&[(0x1111, 0x2222)], 1);
        index.ensure_built(&RangeSet::new());

        let absent = index.hash_of_pair(WeakSum::new(0x3333, 0x4444), WeakSum::default());
        // The bit filter is finer than the bucket table and rejects this
        // hash outright.
        assert!(!index.bit_hit(absent));
        assert!(index.bucket_head(absent).is_none());
    }

    #[test]
    fn known_blocks_are_left_out_of_the_chains() {
        let mut known = RangeSet::new();
        known.insert(1);
        known.insert(2);

        let mut index = index_of(&[(1, 2); 4], 1);
        index.ensure_built(&known);

        let hash = index.hash_of_block(0);
        let mut walk = Vec::new();
        let mut cursor = index.bucket_head(hash);
        while let Some(bid) = cursor {
            walk.push(bid);
            cursor = index.chain_next(bid);
        }
        assert_eq!(walk, vec![0, 3]);
    }

    #[test]
    fn remove_unlinks_head_middle_and_tail() {
        let mut index = index_of(&[(1, 2); 4], 1);
        index.ensure_built(&RangeSet::new());
        let hash = index.hash_of_block(0);

        index.remove(2); // middle
        index.remove(0); // head
        index.remove(3); // tail
        assert_eq!(index.bucket_head(hash), Some(1));
        assert_eq!(index.chain_next(1), None);

        // removing again is harmless
        index.remove(0);
        assert_eq!(index.bucket_head(hash), Some(1));

        // the bit filter stays conservative
        assert!(index.bit_hit(hash));
    }

    #[test]
    fn remove_repairs_an_active_rover() {
        let mut index = index_of(&[(1, 2); 3], 1);
        index.ensure_built(&RangeSet::new());

        index.start_rover(0);
        assert_eq!(index.advance_rover(false), Some(0));
        // cursor now rests on 1; removing 1 must not strand it
        index.remove(1);
        assert_eq!(index.advance_rover(false), Some(2));
        assert_eq!(index.advance_rover(false), None);
    }

    #[test]
    fn only_one_walks_a_single_entry() {
        let mut index = index_of(&[(1, 2); 3], 1);
        index.ensure_built(&RangeSet::new());
        index.start_rover(1);
        assert_eq!(index.advance_rover(true), Some(1));
        assert_eq!(index.advance_rover(true), None);
    }

    #[test]
    fn mutation_invalidates_the_tables() {
        let mut index = index_of(&[(1, 2); 3], 1);
        index.ensure_built(&RangeSet::new());
        assert!(index.is_built());

        index.set_sums(1, BlockSums::new(WeakSum::new(9, 9), &[1u8; 16]));
        assert!(!index.is_built());

        index.ensure_built(&RangeSet::new());
        let hash = index.hash_of_block(1);
        assert!(index.bit_hit(hash));
    }

    #[test]
    fn pair_hash_mixes_the_successor_for_sequential_matching() {
        let index = index_of(&[(1, 2), (3, 4)], 2);
        let lone = index_of(&[(1, 2), (3, 4)], 1);

        // seq_matches = 2 keys on the successor's b; seq_matches = 1 keys on
        // the block's own masked a.
        assert_eq!(index.hash_of_block(0), 2 ^ (4 << 3));
        assert_eq!(lone.hash_of_block(0), 2 ^ (1 << 3));
        // past the last block the zero padding record is mixed in
        assert_eq!(index.hash_of_block(1), 4 ^ (0 << 3));
    }
}

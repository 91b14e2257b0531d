use checksums::{WeakSum, weak_a_mask};

/// Geometry and checksum widths governing a transfer, as negotiated by the
/// control-file header.
///
/// Every derived quantity the matcher needs (`block_shift`, `block_count`,
/// the scan context) is computed here so the rest of the workspace never
/// re-derives it inconsistently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncParams {
    /// Exact length of the target file in bytes.
    pub length: u64,
    /// Block size; always a power of two.
    pub block_size: u32,
    /// Number of consecutive weak hits required before a strong check
    /// (1 or 2).
    pub seq_matches: u8,
    /// Significant bytes of each weak sum on the wire (1..=4).
    pub rsum_bytes: u8,
    /// Significant bytes of each strong sum on the wire (3..=16).
    pub checksum_bytes: u8,
}

impl SyncParams {
    /// `log2(block_size)`.
    #[must_use]
    pub const fn block_shift(&self) -> u8 {
        self.block_size.trailing_zeros() as u8
    }

    /// Number of blocks in the target: `ceil(length / block_size)`.
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        (self.length.div_ceil(self.block_size as u64)) as u32
    }

    /// Bytes of look-ahead the matcher needs beyond a window position:
    /// `block_size * seq_matches`.
    #[must_use]
    pub const fn context(&self) -> usize {
        self.block_size as usize * self.seq_matches as usize
    }

    /// Mask applied to the rolling `a` component before comparison.
    #[must_use]
    pub const fn a_mask(&self) -> u16 {
        weak_a_mask(self.rsum_bytes)
    }

    /// Bytes per record in the binary checksum table.
    #[must_use]
    pub const fn record_len(&self) -> u32 {
        self.rsum_bytes as u32 + self.checksum_bytes as u32
    }
}

/// Checksum pair for one target block: wire-truncated weak sum plus the
/// leading `checksum_bytes` bytes of the block's MD4.
///
/// The strong sum is stored zero-padded to the full MD4 width; only the
/// prefix selected by [`SyncParams::checksum_bytes`] is ever compared. The
/// all-zero `Default` value doubles as the logical padding record past the
/// final block that sequential matching probes against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockSums {
    /// Weak rolling sum, already truncated as it appeared on the wire.
    pub weak: WeakSum,
    strong: [u8; 16],
}

impl BlockSums {
    /// Builds a record from a weak sum and a (possibly truncated) strong
    /// prefix.
    ///
    /// # Panics
    ///
    /// Panics if `strong_prefix` is longer than 16 bytes; the parser and
    /// writer both bound it by `checksum_bytes <= 16`.
    #[must_use]
    pub fn new(weak: WeakSum, strong_prefix: &[u8]) -> Self {
        let mut strong = [0u8; 16];
        strong[..strong_prefix.len()].copy_from_slice(strong_prefix);
        Self { weak, strong }
    }

    /// The stored strong-sum prefix of the given width.
    #[must_use]
    pub fn strong_prefix(&self, checksum_bytes: u8) -> &[u8] {
        &self.strong[..checksum_bytes as usize]
    }

    /// Whether `digest` agrees with the stored strong sum over
    /// `checksum_bytes` bytes.
    #[must_use]
    pub fn strong_matches(&self, digest: &[u8; 16], checksum_bytes: u8) -> bool {
        self.strong_prefix(checksum_bytes) == &digest[..checksum_bytes as usize]
    }
}

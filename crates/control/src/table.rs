use std::io::{self, BufRead};

use checksums::WeakSum;

use crate::error::ControlError;
use crate::params::{BlockSums, SyncParams};

/// Decodes the packed checksum table that follows the header's blank line.
///
/// Each record is `rsum_bytes` big-endian weak-sum bytes (truncated from
/// the left of the full `a.hi a.lo b.hi b.lo` encoding) followed by
/// `checksum_bytes` bytes of the block's MD4. The section has no framing;
/// its length is implied by the header.
pub fn read_block_sums<R: BufRead>(
    reader: &mut R,
    params: &SyncParams,
) -> Result<Vec<BlockSums>, ControlError> {
    let blocks = params.block_count();
    let rsum_len = params.rsum_bytes as usize;
    let strong_len = params.checksum_bytes as usize;

    let mut sums = Vec::with_capacity(blocks as usize);
    let mut record = [0u8; 4 + 16];
    for _ in 0..blocks {
        let record = &mut record[..rsum_len + strong_len];
        reader.read_exact(record).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ControlError::TruncatedTable {
                    blocks,
                    record_len: params.record_len(),
                }
            } else {
                ControlError::Io(err)
            }
        })?;

        let weak = WeakSum::from_truncated_be(&record[..rsum_len])
            .expect("rsum_bytes is validated to 1..=4");
        sums.push(BlockSums::new(weak, &record[rsum_len..]));
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn params(blocks: u32, rsum_bytes: u8, checksum_bytes: u8) -> SyncParams {
        SyncParams {
            length: u64::from(blocks) * 512,
            block_size: 512,
            seq_matches: 1,
            rsum_bytes,
            checksum_bytes,
        }
    }

    #[test]
    fn decodes_records_in_block_order() {
        // Two records, rsum_bytes = 2 (b only), checksum_bytes = 3.
        let bytes = [
            0xab, 0xcd, 1, 2, 3, //
            0x12, 0x34, 9, 8, 7,
        ];
        let sums =
            read_block_sums(&mut Cursor::new(&bytes[..]), &params(2, 2, 3)).unwrap();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[0].weak, WeakSum::new(0, 0xabcd));
        assert_eq!(sums[0].strong_prefix(3), &[1, 2, 3]);
        assert_eq!(sums[1].weak, WeakSum::new(0, 0x1234));
        assert_eq!(sums[1].strong_prefix(3), &[9, 8, 7]);
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = [0u8; 9]; // one and a bit records of length 5
        let err =
            read_block_sums(&mut Cursor::new(&bytes[..]), &params(2, 2, 3)).unwrap_err();
        assert!(matches!(
            err,
            ControlError::TruncatedTable { blocks: 2, record_len: 5 }
        ));
    }
}

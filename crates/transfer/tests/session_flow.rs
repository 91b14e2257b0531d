//! End-to-end session tests against an in-memory range fetcher.
//!
//! These cover the full control-parse → seed → fetch → verify → finalize
//! flow without any network: the fetcher double serves (and optionally
//! corrupts or refuses) ranges straight out of the target buffer.

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use control::writer;
use transfer::{
    ByteRange, FetchError, HttpRangeFetcher, RangeStream, SessionError, SessionStatus,
    SyncSession, VerifyOutcome, fetch_remaining,
};

// ============================================================================
// Fixtures
// ============================================================================

fn noise(len: usize, mut state: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.wrapping_mul(0x2545F4914F6CDD1D).to_le_bytes());
    }
    out.truncate(len);
    out
}

fn control_bytes(target: &[u8], block_size: u32, mtime_unix: Option<i64>) -> Vec<u8> {
    let opts = writer::WriterOptions {
        filename: Some("target.bin".into()),
        urls: vec!["http://mirror.example/target.bin".into()],
        block_size: Some(block_size),
        mtime_unix,
        hash_lengths: Some((1, 4, 16)),
    };
    let mut encoded = Vec::new();
    writer::write_control(&mut Cursor::new(target), &opts, &mut encoded).unwrap();
    encoded
}

fn session_for(
    target: &[u8],
    block_size: u32,
    dir: &Path,
    mtime_unix: Option<i64>,
) -> SyncSession {
    SyncSession::begin(Cursor::new(control_bytes(target, block_size, mtime_unix)), dir)
        .unwrap()
}

/// Serves ranges from the target buffer; named URLs can fail outright or
/// serve a flipped first byte per range.
struct FakeFetcher {
    target: Vec<u8>,
    failing: HashSet<String>,
    corrupting: HashSet<String>,
    requests: Vec<(String, Vec<ByteRange>)>,
}

impl FakeFetcher {
    fn serving(target: &[u8]) -> Self {
        Self {
            target: target.to_vec(),
            failing: HashSet::new(),
            corrupting: HashSet::new(),
            requests: Vec::new(),
        }
    }
}

struct VecStream {
    chunks: std::vec::IntoIter<(u64, Vec<u8>)>,
}

impl RangeStream for VecStream {
    fn next_chunk(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, FetchError> {
        match self.chunks.next() {
            Some((offset, bytes)) => {
                buf.clear();
                buf.extend_from_slice(&bytes);
                Ok(Some(offset))
            }
            None => Ok(None),
        }
    }
}

impl HttpRangeFetcher for FakeFetcher {
    fn fetch_ranges(
        &mut self,
        url: &str,
        ranges: &[ByteRange],
    ) -> Result<Box<dyn RangeStream + '_>, FetchError> {
        self.requests.push((url.to_owned(), ranges.to_vec()));
        if self.failing.contains(url) {
            return Err(FetchError::HttpStatus {
                code: 404,
                reason: "Not Found".into(),
            });
        }
        let corrupt = self.corrupting.contains(url);
        let chunks: Vec<(u64, Vec<u8>)> = ranges
            .iter()
            .map(|r| {
                let end = (r.end + 1).min(self.target.len() as u64) as usize;
                let mut bytes = self.target[r.start as usize..end].to_vec();
                if corrupt && !bytes.is_empty() {
                    bytes[0] ^= 0xff;
                }
                (r.start, bytes)
            })
            .collect();
        Ok(Box::new(VecStream {
            chunks: chunks.into_iter(),
        }))
    }
}

const URL: &str = "http://a.example/t";
const URL_B: &str = "http://b.example/t";

// ============================================================================
// Range bookkeeping
// ============================================================================

#[test]
fn fresh_session_needs_one_range_covering_everything() {
    let target = noise(16 * 256, 41);
    let dir = tempfile::tempdir().unwrap();
    let session = session_for(&target, 256, dir.path(), None);

    assert_eq!(session.status(), SessionStatus::Empty);
    assert_eq!(
        session.needed_byte_ranges(),
        vec![ByteRange { start: 0, end: 16 * 256 - 1 }]
    );
}

#[test]
fn complete_session_needs_nothing() {
    let target = noise(16 * 256, 42);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    session.submit_seed(Cursor::new(target)).unwrap();

    assert_eq!(session.status(), SessionStatus::Complete);
    assert_eq!(session.needed_byte_ranges(), vec![]);
}

// ============================================================================
// Fetch-and-assemble flows
// ============================================================================

#[test]
fn no_seed_transfer_fetches_everything_and_verifies() {
    let target = noise(32 * 256 + 77, 43);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);

    fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();
    assert_eq!(session.status(), SessionStatus::Complete);
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);

    let out = dir.path().join("out.bin");
    session.finalize(&out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), target);
}

#[test]
fn exact_seed_means_zero_requests() {
    let target = noise(32 * 256, 44);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);

    session.submit_seed(Cursor::new(target.clone())).unwrap();
    fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();

    assert!(fetcher.requests.is_empty());
    assert_eq!(session.stats().requests, 0);
    assert_eq!(session.stats().fetched_bytes, 0);
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);
}

#[test]
fn half_seed_requests_exactly_the_tail() {
    let blocks = 32u64;
    let bs = 256u64;
    let target = noise((blocks * bs) as usize, 45);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);

    session
        .submit_seed(Cursor::new(target[..(blocks as usize / 2) * bs as usize].to_vec()))
        .unwrap();
    fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();

    assert_eq!(fetcher.requests.len(), 1);
    assert_eq!(
        fetcher.requests[0].1,
        vec![ByteRange { start: blocks / 2 * bs, end: blocks * bs - 1 }]
    );
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);
}

#[test]
fn scattered_seeds_in_any_order_leave_nothing_to_fetch() {
    let bs = 256usize;
    let target = noise(24 * bs + 100, 46);
    let pieces = [
        target[..8 * bs].to_vec(),
        target[8 * bs..16 * bs].to_vec(),
        target[16 * bs..].to_vec(),
    ];

    for order in [[2usize, 0, 1], [1, 0, 2]] {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_for(&target, 256, dir.path(), None);
        let mut fetcher = FakeFetcher::serving(&target);
        for idx in order {
            session.submit_seed(Cursor::new(pieces[idx].clone())).unwrap();
        }
        fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();
        assert_eq!(session.stats().fetched_bytes, 0, "order {order:?} fetched");
        assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);
    }
}

#[test]
fn corrupted_local_copy_refetches_exactly_the_damaged_blocks() {
    let bs = 256usize;
    let blocks = 64usize;
    let len = bs * blocks;
    let target = noise(len, 47);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);

    let mut stale = target.clone();
    for at in [len / 2, 11, len - 11] {
        stale[at] ^= 0x20;
    }
    session.submit_seed(Cursor::new(stale)).unwrap();

    // Damage at len/2, 11 and len-11 lands in blocks 32, 0 and 63.
    assert_eq!(session.blocks_todo(), 3);
    fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();

    assert_eq!(fetcher.requests.len(), 1);
    assert_eq!(
        fetcher.requests[0].1,
        vec![
            ByteRange { start: 0, end: 255 },
            ByteRange { start: 32 * 256, end: 33 * 256 - 1 },
            ByteRange { start: 63 * 256, end: 64 * 256 - 1 },
        ]
    );
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);

    let out = dir.path().join("target.bin");
    session.finalize(&out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), target);
}

// ============================================================================
// Mirror failure handling
// ============================================================================

#[test]
fn failing_mirror_is_blacklisted_and_another_succeeds() {
    let target = noise(16 * 256, 48);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);
    fetcher.failing.insert(URL.into());

    fetch_remaining(&mut session, &mut fetcher, &[URL.into(), URL_B.into()]).unwrap();
    assert_eq!(session.status(), SessionStatus::Complete);

    // The bad URL can have been tried at most once.
    let bad_tries = fetcher.requests.iter().filter(|(u, _)| u == URL).count();
    assert!(bad_tries <= 1);
    assert!(fetcher.requests.iter().any(|(u, _)| u == URL_B));
}

#[test]
fn corrupting_mirror_is_abandoned_for_a_clean_one() {
    let target = noise(16 * 256, 49);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);
    fetcher.corrupting.insert(URL.into());

    fetch_remaining(&mut session, &mut fetcher, &[URL.into(), URL_B.into()]).unwrap();
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);
}

#[test]
fn every_url_failing_is_fatal() {
    let target = noise(8 * 256, 50);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);
    fetcher.failing.insert(URL.into());
    fetcher.failing.insert(URL_B.into());

    let err = fetch_remaining(&mut session, &mut fetcher, &[URL.into(), URL_B.into()])
        .unwrap_err();
    assert!(matches!(err, SessionError::AllUrlsExhausted));
    // The scratch state survives for a later resume.
    assert_eq!(session.status(), SessionStatus::Empty);
}

#[test]
fn no_urls_at_all_is_fatal_when_blocks_are_missing() {
    let target = noise(8 * 256, 51);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);
    let mut fetcher = FakeFetcher::serving(&target);

    let err = fetch_remaining(&mut session, &mut fetcher, &[]).unwrap_err();
    assert!(matches!(err, SessionError::AllUrlsExhausted));
}

// ============================================================================
// Completion and finalization
// ============================================================================

#[test]
fn unverifiable_block_exhausts_every_mirror() {
    // Hand-build a control file whose SHA-1 cannot match the blocks.
    let target = noise(4 * 256, 52);
    let mut encoded = control_bytes(&target, 256, None);
    // Flip a byte inside the binary checksum table so one block of the
    // fetched data is "wrong" relative to the table, yet the SHA-1 header
    // still describes the original file.
    let table_start = encoded.len() - 4 * 20;
    encoded[table_start + 7] ^= 0xff;

    let dir = tempfile::tempdir().unwrap();
    let mut session = SyncSession::begin(Cursor::new(encoded), dir.path()).unwrap();
    let mut fetcher = FakeFetcher::serving(&target);

    // The block whose stored sum was damaged can never verify; its mirror
    // gets blacklisted for serving "corrupt" data.
    let err =
        fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap_err();
    assert!(matches!(err, SessionError::AllUrlsExhausted));
}

#[test]
fn finalize_backs_up_the_previous_target_and_restores_mtime() {
    let target = noise(8 * 256, 53);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("target.bin");
    fs::write(&out, b"previous contents").unwrap();

    let mtime = 1_100_000_000i64;
    let mut session = session_for(&target, 256, dir.path(), Some(mtime));
    let mut fetcher = FakeFetcher::serving(&target);
    fetch_remaining(&mut session, &mut fetcher, &[URL.into()]).unwrap();
    assert_eq!(session.complete().unwrap(), VerifyOutcome::Verified);
    session.finalize(&out).unwrap();

    assert_eq!(fs::read(&out).unwrap(), target);
    let backup = dir.path().join("target.bin.zs-old");
    assert_eq!(fs::read(&backup).unwrap(), b"previous contents");

    let meta = fs::metadata(&out).unwrap();
    let stamp = filetime::FileTime::from_last_modification_time(&meta);
    assert_eq!(stamp.unix_seconds(), mtime);
}

#[test]
fn duplicate_and_unreadable_seed_paths_are_skipped() {
    let target = noise(8 * 256, 54);
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_for(&target, 256, dir.path(), None);

    let seed_path = dir.path().join("seed.bin");
    fs::write(&seed_path, &target[..4 * 256]).unwrap();

    let first = session.submit_seed_file(&seed_path).unwrap();
    assert_eq!(first, 4);
    let second = session.submit_seed_file(&seed_path).unwrap();
    assert_eq!(second, 0);

    // A missing path is logged and skipped, not fatal.
    let missing = session.submit_seed_file(&dir.path().join("nope")).unwrap();
    assert_eq!(missing, 0);
}

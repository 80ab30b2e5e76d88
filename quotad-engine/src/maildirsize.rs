//! # maildirsize Parser
//!
//! Sum the per-message entries of a maildir++ `maildirsize` file while it is
//! being streamed in bounded chunks.
//!
//! ## Design Principles
//!
//! 1. **State Machine Pattern**: The parser keeps only the line counter, the
//!    running sum and the unterminated tail of the previous chunk.
//! 2. **Streaming Friendly**: Lines may straddle any chunk boundary; a tail is
//!    carried until its terminator arrives or the input ends.
//! 3. **Bounded Memory**: A tail that fills the whole working buffer is an
//!    error, never a reason to grow.
//! 4. **Fail Fast**: The first malformed line aborts the whole file.
//!
//! ## File Layout
//!
//! ```text
//! 1000000S,1000C      <- quota definition: <digits><letters>(,<digits><letters>)*
//! 4096 1              <- <signed bytes> <message count>
//! -1024 -1
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::{Buf, BytesMut};
use fs4::FileExt;
use quotad_common::{AccountingError, QuotadError, QuotadResult};

/// Name of the accounting file inside a maildir.
pub const SIDECAR_FILE_NAME: &str = "maildirsize";

/// Size of the working buffer used while streaming the file.
pub const CHUNK_SIZE: usize = 5120;

/// Incremental parser for `maildirsize` content.
#[derive(Debug)]
pub struct MaildirSizeParser {
    pending: BytesMut,
    capacity: usize,
    line: usize,
    sum: i64,
}

impl MaildirSizeParser {
    /// Creates a parser with the default working buffer.
    pub fn new() -> Self {
        Self::with_capacity(CHUNK_SIZE)
    }

    /// Creates a parser that carries at most `capacity - 1` bytes of an
    /// unterminated line from one chunk to the next.
    ///
    /// Lines are bounded only when each chunk is no larger than
    /// [`spare`](Self::spare), as [`sum_reader`] does.
    pub fn with_capacity(capacity: usize) -> Self {
        MaildirSizeParser {
            pending: BytesMut::with_capacity(capacity),
            capacity: capacity.max(1),
            line: 0,
            sum: 0,
        }
    }

    /// Returns how many bytes the next chunk may hold.
    pub fn spare(&self) -> usize {
        self.capacity - self.pending.len()
    }

    /// Consumes one chunk, parsing every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), AccountingError> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line = self.pending.split_to(pos);
            self.pending.advance(1);
            self.consume_line(&line)?;
        }
        if self.pending.len() >= self.capacity {
            return Err(AccountingError::LineTooLong);
        }
        Ok(())
    }

    /// Ends the input and returns the clamped total.
    ///
    /// An unterminated last line is parsed as if it had a terminator.
    pub fn finish(mut self) -> Result<u64, AccountingError> {
        if !self.pending.is_empty() {
            let line = self.pending.split();
            self.consume_line(&line)?;
        }
        Ok(u64::try_from(self.sum).unwrap_or(0))
    }

    fn consume_line(&mut self, line: &[u8]) -> Result<(), AccountingError> {
        self.line += 1;
        if self.line == 1 {
            return if is_quota_definition(line) {
                Ok(())
            } else {
                Err(AccountingError::BadHeader)
            };
        }
        let value = parse_leading_i64(line).ok_or(AccountingError::BadEntry { line: self.line })?;
        self.sum = self
            .sum
            .checked_add(value)
            .ok_or(AccountingError::Overflow { line: self.line })?;
        Ok(())
    }
}

impl Default for MaildirSizeParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    GroupStart,
    Digits,
    Letters,
}

/// Checks `<digits><letters>(,<digits><letters>)*` over the whole line.
fn is_quota_definition(line: &[u8]) -> bool {
    let mut state = HeaderState::GroupStart;
    for &b in line {
        state = match (state, b) {
            (HeaderState::GroupStart | HeaderState::Digits, b'0'..=b'9') => HeaderState::Digits,
            (HeaderState::Digits | HeaderState::Letters, b) if b.is_ascii_alphabetic() => {
                HeaderState::Letters
            }
            (HeaderState::Letters, b',') => HeaderState::GroupStart,
            _ => return false,
        };
    }
    state == HeaderState::Letters
}

/// Parses the leading signed integer of an entry line, ignoring the rest.
fn parse_leading_i64(line: &[u8]) -> Option<i64> {
    let mut rest = line;
    while let Some((&b, tail)) = rest.split_first() {
        if !b.is_ascii_whitespace() {
            break;
        }
        rest = tail;
    }
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let mut value: i64 = 0;
    for &b in &rest[..digits] {
        let digit = i64::from(b - b'0');
        value = value.checked_mul(10)?;
        value = if negative {
            value.checked_sub(digit)?
        } else {
            value.checked_add(digit)?
        };
    }
    Some(value)
}

/// Streams exactly `len` bytes from `reader` through a parser of the given
/// working-buffer size.
pub fn sum_reader<R: Read>(
    reader: &mut R,
    len: u64,
    capacity: usize,
) -> Result<u64, AccountingError> {
    let mut parser = MaildirSizeParser::with_capacity(capacity);
    let mut chunk = vec![0u8; parser.capacity];
    let mut remaining = len;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(parser.spare(), |r| r.min(parser.spare()));
        let got = match reader.read(&mut chunk[..want]) {
            Ok(0) => return Err(AccountingError::ShortRead { missing: remaining }),
            Ok(got) => got,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        remaining -= got as u64;
        parser.feed(&chunk[..got])?;
    }
    parser.finish()
}

/// Shared `flock` held for the duration of a parse.
struct SharedLock<'a> {
    file: &'a File,
    path: &'a Path,
}

impl<'a> SharedLock<'a> {
    fn acquire(file: &'a File, path: &'a Path) -> QuotadResult<Self> {
        loop {
            match FileExt::lock_shared(file) {
                Ok(()) => return Ok(SharedLock { file, path }),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(QuotadError::Lock {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}

impl Drop for SharedLock<'_> {
    fn drop(&mut self) {
        loop {
            match FileExt::unlock(self.file) {
                Ok(()) => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!("cannot unlock {}: {}", self.path.display(), err);
                    return;
                }
            }
        }
    }
}

/// Sums an opened accounting file under a shared lock.
///
/// The length is taken once from metadata; appends made while the lock is
/// held by us are not observed.
pub fn sum_locked(file: &File, path: &Path) -> QuotadResult<u64> {
    let accounting = |source: AccountingError| QuotadError::Accounting {
        path: path.to_path_buf(),
        source,
    };

    let _lock = SharedLock::acquire(file, path)?;
    let len = file.metadata().map_err(|err| accounting(err.into()))?.len();
    let mut reader = file;
    sum_reader(&mut reader, len, CHUNK_SIZE).map_err(accounting)
}

/// Returns the sidecar path for a maildir.
pub fn sidecar_path(maildir: &Path) -> PathBuf {
    maildir.join(SIDECAR_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &[u8] = b"1000000S,1000C\n100 1\n-30 -1\n50 2\n";

    fn parse_all(data: &[u8]) -> Result<u64, AccountingError> {
        let mut parser = MaildirSizeParser::new();
        parser.feed(data)?;
        parser.finish()
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn sums_entries_after_header() {
        assert_eq!(parse_all(SAMPLE).unwrap(), 120);
    }

    #[test]
    fn clamps_negative_totals() {
        assert_eq!(parse_all(b"10S\n10 1\n-50 -1\n").unwrap(), 0);
    }

    #[test]
    fn empty_input_counts_as_zero() {
        assert_eq!(parse_all(b"").unwrap(), 0);
    }

    #[test]
    fn header_only_counts_as_zero() {
        assert_eq!(parse_all(b"5000S\n").unwrap(), 0);
    }

    #[test]
    fn validates_header_grammar() {
        assert!(is_quota_definition(b"1000000S"));
        assert!(is_quota_definition(b"1000000S,1000C"));
        assert!(is_quota_definition(b"12ab,3cd,4E"));
        assert!(!is_quota_definition(b""));
        assert!(!is_quota_definition(b"S1000"));
        assert!(!is_quota_definition(b"1000"));
        assert!(!is_quota_definition(b"1000S1000C"));
        assert!(!is_quota_definition(b"1000S,"));
        assert!(!is_quota_definition(b"1000S 1000C"));
    }

    #[test]
    fn malformed_header_zeroes_valid_entries() {
        let err = parse_all(b"1000S1000C\n100 1\n").unwrap_err();
        assert!(matches!(err, AccountingError::BadHeader));
    }

    #[test]
    fn malformed_entry_reports_line() {
        let err = parse_all(b"1000S\n100 1\nabc 1\n").unwrap_err();
        assert!(matches!(err, AccountingError::BadEntry { line: 3 }));
        let err = parse_all(b"1000S\n\n").unwrap_err();
        assert!(matches!(err, AccountingError::BadEntry { line: 2 }));
    }

    #[test]
    fn parses_leading_integer_only() {
        assert_eq!(parse_leading_i64(b"  -42 7"), Some(-42));
        assert_eq!(parse_leading_i64(b"+8"), Some(8));
        assert_eq!(parse_leading_i64(b"19abc"), Some(19));
        assert_eq!(parse_leading_i64(b"-"), None);
        assert_eq!(parse_leading_i64(b"99999999999999999999"), None);
        assert_eq!(parse_leading_i64(b"-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn rejects_sum_overflow() {
        let data = b"1S\n9223372036854775807 1\n1 1\n";
        assert!(matches!(
            parse_all(data).unwrap_err(),
            AccountingError::Overflow { line: 3 }
        ));
    }

    #[test]
    fn unterminated_last_line_is_counted() {
        assert_eq!(parse_all(b"1000S\n100 1\n23 1").unwrap(), 123);
    }

    #[test]
    fn chunk_boundaries_do_not_change_sum() {
        for step in 1..=SAMPLE.len() {
            let mut reader = Trickle { data: SAMPLE, step };
            let total = sum_reader(&mut reader, SAMPLE.len() as u64, CHUNK_SIZE).unwrap();
            assert_eq!(total, 120, "step {step}");
        }
    }

    #[test]
    fn small_buffer_carries_partial_lines() {
        let mut reader = Trickle { data: SAMPLE, step: 64 };
        let total = sum_reader(&mut reader, SAMPLE.len() as u64, 16).unwrap();
        assert_eq!(total, 120);
    }

    #[test]
    fn line_filling_buffer_is_too_long() {
        let mut data = b"1S\n".to_vec();
        data.extend_from_slice(&[b'7'; 16]);
        data.push(b'\n');
        let mut reader = Trickle { data: &data, step: 64 };
        let err = sum_reader(&mut reader, data.len() as u64, 16).unwrap_err();
        assert!(matches!(err, AccountingError::LineTooLong));
    }

    #[test]
    fn line_one_short_of_buffer_fits() {
        let mut data = b"1S\n".to_vec();
        data.extend_from_slice(&[b'7'; 15]);
        data.push(b'\n');
        let mut reader = Trickle { data: &data, step: 64 };
        let total = sum_reader(&mut reader, data.len() as u64, 16).unwrap();
        assert_eq!(total, 777_777_777_777_777);
    }

    #[test]
    fn fragment_limit_applies_to_carried_tail() {
        let mut parser = MaildirSizeParser::with_capacity(8);
        parser.feed(b"1S\n123456789012 1\n").unwrap();
        assert_eq!(parser.finish().unwrap(), 123_456_789_012);

        let mut parser = MaildirSizeParser::with_capacity(8);
        parser.feed(b"1S\n1234567").unwrap();
        let err = parser.feed(b"8").unwrap_err();
        assert!(matches!(err, AccountingError::LineTooLong));
    }

    #[test]
    fn early_eof_is_short_read() {
        let mut reader = Trickle { data: SAMPLE, step: 64 };
        let err = sum_reader(&mut reader, SAMPLE.len() as u64 + 10, CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, AccountingError::ShortRead { missing: 10 }));
    }

    #[test]
    fn retries_interrupted_reads() {
        struct Flaky<'a> {
            interrupted: bool,
            inner: Trickle<'a>,
        }
        impl Read for Flaky<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::ErrorKind::Interrupted.into());
                }
                self.inner.read(buf)
            }
        }

        let mut reader = Flaky {
            interrupted: false,
            inner: Trickle { data: SAMPLE, step: 7 },
        };
        assert_eq!(sum_reader(&mut reader, SAMPLE.len() as u64, CHUNK_SIZE).unwrap(), 120);
    }

    #[test]
    fn sums_file_under_shared_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = sidecar_path(dir.path());
        let mut out = File::create(&path).unwrap();
        out.write_all(SAMPLE).unwrap();
        drop(out);

        let file = File::open(&path).unwrap();
        assert_eq!(sum_locked(&file, &path).unwrap(), 120);

        // The lock was released: an exclusive lock is immediately available.
        let other = File::open(&path).unwrap();
        FileExt::try_lock_exclusive(&other).unwrap();
    }

    #[test]
    fn waits_for_exclusive_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = sidecar_path(dir.path());
        std::fs::write(&path, b"10S\n5 1\n").unwrap();

        let writer = File::open(&path).unwrap();
        FileExt::lock_exclusive(&writer).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let file = File::open(&reader_path).unwrap();
            tx.send(sum_locked(&file, &reader_path).unwrap()).unwrap();
        });

        let pending = rx.recv_timeout(std::time::Duration::from_millis(200));
        assert!(pending.is_err(), "parse finished while a writer held the lock");

        FileExt::unlock(&writer).unwrap();
        let total = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(total, 5);
        reader.join().unwrap();
    }

    #[test]
    fn shared_lock_admits_readers_and_excludes_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = sidecar_path(dir.path());
        std::fs::write(&path, SAMPLE).unwrap();

        let file = File::open(&path).unwrap();
        let guard = SharedLock::acquire(&file, &path).unwrap();

        let other_reader = File::open(&path).unwrap();
        FileExt::try_lock_shared(&other_reader).unwrap();
        FileExt::unlock(&other_reader).unwrap();

        let writer = File::open(&path).unwrap();
        assert!(FileExt::try_lock_exclusive(&writer).is_err());

        drop(guard);
        FileExt::try_lock_exclusive(&writer).unwrap();
    }

    #[test]
    fn reports_accounting_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = sidecar_path(dir.path());
        std::fs::write(&path, b"bogus\n1 1\n").unwrap();

        let file = File::open(&path).unwrap();
        let err = sum_locked(&file, &path).unwrap_err();
        assert!(matches!(
            err,
            QuotadError::Accounting { source: AccountingError::BadHeader, .. }
        ));
    }
}

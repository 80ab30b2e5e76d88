//! # Request Line Framer
//!
//! Accumulate bytes from a connection into one bounded request line.
//!
//! ## Design Principles
//!
//! 1. **Streaming Friendly**: Bytes arrive in arbitrary pieces; `commit`
//!    returns `None` until the terminator has been seen.
//! 2. **Fixed Capacity**: The buffer is allocated once at the request bound
//!    and reads go straight into its spare tail.
//! 3. **Incremental Scan**: Only newly committed bytes are searched for the
//!    terminator.
//! 4. **Fail Fast**: A full buffer without a terminator is an error, never a
//!    truncated request.

use bytes::{Bytes, BytesMut};

use quotad_common::TERMINATOR;

/// Framing errors surfaced to the connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer filled up before a terminator arrived.
    TooLong { limit: usize },
}

/// Bounded accumulator for a single `\n`-terminated line.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    filled: usize,
}

impl LineFramer {
    /// Creates a framer that accepts lines of at most `capacity` bytes,
    /// terminator included.
    pub fn new(capacity: usize) -> Self {
        LineFramer {
            buf: BytesMut::zeroed(capacity),
            filled: 0,
        }
    }

    /// Returns the unfilled tail to read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Returns how many bytes have been received so far.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Returns true if nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Accounts for `n` bytes written into `spare_mut`.
    ///
    /// Returns the line without its terminator once one is present. Bytes
    /// after the terminator are discarded and the framer is spent.
    pub fn commit(&mut self, n: usize) -> Result<Option<Bytes>, FrameError> {
        let start = self.filled;
        self.filled = (start + n).min(self.buf.len());

        if let Some(pos) = self.buf[start..self.filled]
            .iter()
            .position(|&b| b == TERMINATOR)
        {
            let line = self.buf.split_to(start + pos).freeze();
            self.buf.clear();
            self.filled = 0;
            return Ok(Some(line));
        }
        if self.filled == self.buf.len() {
            return Err(FrameError::TooLong {
                limit: self.buf.len(),
            });
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(framer: &mut LineFramer, data: &[u8]) -> Result<Option<Bytes>, FrameError> {
        framer.spare_mut()[..data.len()].copy_from_slice(data);
        framer.commit(data.len())
    }

    #[test]
    fn frames_single_read() {
        let mut framer = LineFramer::new(64);
        let line = push(&mut framer, b"/var/mail/alice\n").unwrap().unwrap();
        assert_eq!(&line[..], b"/var/mail/alice");
    }

    #[test]
    fn handles_partial_lines() {
        let mut framer = LineFramer::new(64);
        assert!(push(&mut framer, b"/var/ma").unwrap().is_none());
        assert_eq!(framer.len(), 7);
        let line = push(&mut framer, b"il/bob\n").unwrap().unwrap();
        assert_eq!(&line[..], b"/var/mail/bob");
    }

    #[test]
    fn finds_terminator_mid_read() {
        let mut framer = LineFramer::new(64);
        let line = push(&mut framer, b"/a\ntrailing").unwrap().unwrap();
        assert_eq!(&line[..], b"/a");
    }

    #[test]
    fn empty_line_is_framed() {
        let mut framer = LineFramer::new(8);
        let line = push(&mut framer, b"\n").unwrap().unwrap();
        assert!(line.is_empty());
    }

    #[test]
    fn full_buffer_without_terminator_is_rejected() {
        let mut framer = LineFramer::new(8);
        assert!(push(&mut framer, b"/abc").unwrap().is_none());
        assert_eq!(
            push(&mut framer, b"defg"),
            Err(FrameError::TooLong { limit: 8 })
        );
    }

    #[test]
    fn terminator_in_last_slot_fits() {
        let mut framer = LineFramer::new(8);
        let line = push(&mut framer, b"/abcdef\n").unwrap().unwrap();
        assert_eq!(&line[..], b"/abcdef");
    }
}

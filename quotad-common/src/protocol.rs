//! # Wire Protocol
//!
//! Purpose: Define the one-line request/response exchange spoken over the
//! quotad Unix socket.
//!
//! ## Design Principles
//!
//! 1. **One Shot**: A connection carries exactly one request and one response.
//! 2. **Byte Paths**: Request paths are raw bytes; no UTF-8 requirement.
//! 3. **Collapsed Failures**: Every non-numeric outcome is answered with the
//!    refusal sentinel `0`, which is indistinguishable from a real zero.
//!
//! ## Frame Layout
//!
//! ```text
//! request:  /var/mail/alice\n        (<= MAX_REQUEST_LEN bytes, terminator included)
//! response: 1048576\n                (decimal byte count)
//!           0\n                      (zero quota, or refused)
//! ```

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{QuotadError, QuotadResult};

/// Maximum request size in bytes, terminator included.
pub const MAX_REQUEST_LEN: usize = 8192;

/// Byte terminating both requests and responses.
pub const TERMINATOR: u8 = b'\n';

/// Encoded refusal sentinel.
pub const REFUSAL: &[u8] = b"0\n";

/// A validated quota request: one absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    path: PathBuf,
}

impl Request {
    /// Builds a request from a framed line (terminator already stripped).
    ///
    /// Only absolute paths are accepted; the empty line is not absolute.
    pub fn from_line(line: &[u8]) -> QuotadResult<Self> {
        if line.first() != Some(&b'/') {
            return Err(QuotadError::RelativePath(
                String::from_utf8_lossy(line).into_owned(),
            ));
        }
        Ok(Request {
            path: PathBuf::from(OsStr::from_bytes(line)),
        })
    }

    /// Builds a request for an outgoing query.
    pub fn new(path: impl Into<PathBuf>) -> QuotadResult<Self> {
        let path = path.into();
        let raw = path.as_os_str().as_bytes();
        if raw.contains(&TERMINATOR) {
            return Err(QuotadError::EmbeddedTerminator(path.display().to_string()));
        }
        let request = Self::from_line(raw)?;
        if raw.len() + 1 > MAX_REQUEST_LEN {
            return Err(QuotadError::RequestTooLong {
                limit: MAX_REQUEST_LEN,
            });
        }
        Ok(request)
    }

    /// Returns the requested path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consumes the request and returns the owned path.
    pub fn into_path(self) -> PathBuf {
        self.path
    }

    /// Encodes the request as `<path>\n`.
    pub fn encode(&self) -> Vec<u8> {
        let raw = self.path.as_os_str().as_bytes();
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.extend_from_slice(raw);
        out.push(TERMINATOR);
        out
    }
}

/// Outcome of a request as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// A usable answer in bytes.
    Quota(u64),
    /// No usable answer; encoded exactly like `Quota(0)`.
    Refused,
}

impl Response {
    /// Returns the numeric value carried on the wire.
    pub const fn value(self) -> u64 {
        match self {
            Self::Quota(bytes) => bytes,
            Self::Refused => 0,
        }
    }

    /// Encodes the response as `<decimal>\n`.
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::Refused => REFUSAL.to_vec(),
            Self::Quota(bytes) => format!("{bytes}\n").into_bytes(),
        }
    }

    /// Decodes a response line (terminator optional).
    ///
    /// Returns `None` when the line is not a bare decimal integer. A decoded
    /// zero may also be a refusal; the wire cannot tell them apart.
    pub fn decode(line: &[u8]) -> Option<u64> {
        let digits = line.strip_suffix(&[TERMINATOR]).unwrap_or(line);
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

//! # quotad Error Types
//!
//! ## Design Principles
//!
//! 1. **Categorized Failures**: Each variant belongs to one category (protocol,
//!    resolution, accounting, transport, fatal) that decides its handling.
//! 2. **Severity Hints**: Each variant carries the log severity it is reported at.
//! 3. **Contained by Default**: Only the fatal category may end the server; all
//!    others are answered with the refusal sentinel or a silent close.
//! 4. **Context Carried**: Filesystem failures keep the offending path and the
//!    underlying `io::Error` for the log line.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used across quotad components.
pub type QuotadResult<T> = core::result::Result<T, QuotadError>;

/// High-level category for grouping failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Malformed request from the peer.
    Protocol,
    /// The queried path cannot be answered (missing, wrong type).
    Resolution,
    /// The maildir accounting file could not be summed.
    Accounting,
    /// The connection itself failed or stalled.
    Transport,
    /// The supervisor can no longer admit or bound work.
    Fatal,
}

impl ErrorCategory {
    /// Returns true if the failure must stop the server.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Log severity levels understood by the logging sink.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    /// Suppressed unless debug logging is enabled.
    Debug,
    /// Routine events.
    Normal,
    /// Failures worth an operator's attention.
    Error,
    /// Failures that stop the server.
    Critical,
}

/// Failures raised while summing a `maildirsize` file.
#[derive(Debug, Error)]
pub enum AccountingError {
    /// The first line does not match the quota definition grammar.
    #[error("bad header")]
    BadHeader,
    /// An entry line has no leading integer (1-based line number).
    #[error("bad quota format at line {line}")]
    BadEntry { line: usize },
    /// An entry overflowed the running sum (1-based line number).
    #[error("quota sum overflow at line {line}")]
    Overflow { line: usize },
    /// A single line did not fit in the working buffer.
    #[error("line too long")]
    LineTooLong,
    /// The file ended before its recorded length was read.
    #[error("short read ({missing} bytes missing)")]
    ShortRead { missing: u64 },
    /// The read itself failed.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Every failure a quotad component can report.
#[derive(Debug, Error)]
pub enum QuotadError {
    /// The request path does not start with `/`.
    #[error("refusing to handle request for non absolute path {0}")]
    RelativePath(String),
    /// An outgoing path contains the request terminator.
    #[error("path {0} contains a line terminator")]
    EmbeddedTerminator(String),
    /// No terminator within the request bound.
    #[error("request exceeds {limit} bytes without a terminator")]
    RequestTooLong { limit: usize },

    /// `stat` on the queried path failed.
    #[error("stat failed for {}: {source}", .path.display())]
    Stat { path: PathBuf, source: io::Error },
    /// The queried path is neither a regular file nor a directory.
    #[error("query for unsupported file {}", .0.display())]
    Unsupported(PathBuf),
    /// Appending the sidecar name would exceed the path bound.
    #[error("maildir name {} too long", .0.display())]
    NameTooLong(PathBuf),
    /// The sidecar accounting file could not be opened.
    #[error("cannot open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// The shared lock on the sidecar could not be taken.
    #[error("cannot lock {}: {source}", .path.display())]
    Lock { path: PathBuf, source: io::Error },
    /// The sidecar content was malformed or unreadable.
    #[error("{source} in {}", .path.display())]
    Accounting {
        path: PathBuf,
        source: AccountingError,
    },

    /// The deadline elapsed before the exchange finished.
    #[error("worker timed out ({0} time)")]
    Timeout(&'static str),
    /// The peer closed the connection early.
    #[error("remote disconnected ({0} time)")]
    Disconnected(&'static str),
    /// Reading from the peer failed.
    #[error("recv failed in worker: {0}")]
    Recv(io::Error),
    /// Writing to the peer failed.
    #[error("send fail in worker: {0}")]
    Send(io::Error),
    /// The blocking resolver task did not complete.
    #[error("resolver task failed: {0}")]
    Worker(String),

    /// `accept` failed with a non-transient error.
    #[error("failed to accept incoming connection: {0}")]
    Accept(io::Error),
    /// The worker slot pool was closed.
    #[error("failed to wait on worker slots")]
    SlotsClosed,
}

impl QuotadError {
    /// Returns the coarse category of the error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::RelativePath(_) | Self::EmbeddedTerminator(_) | Self::RequestTooLong { .. } => {
                ErrorCategory::Protocol
            }
            Self::Stat { .. } | Self::Unsupported(_) | Self::NameTooLong(_) | Self::Open { .. } => {
                ErrorCategory::Resolution
            }
            Self::Lock { .. } | Self::Accounting { .. } => ErrorCategory::Accounting,
            Self::Timeout(_)
            | Self::Disconnected(_)
            | Self::Recv(_)
            | Self::Send(_)
            | Self::Worker(_) => ErrorCategory::Transport,
            Self::Accept(_) | Self::SlotsClosed => ErrorCategory::Fatal,
        }
    }

    /// Returns the severity the error is logged at.
    pub const fn severity(&self) -> Severity {
        match self {
            Self::RelativePath(_) | Self::EmbeddedTerminator(_) | Self::RequestTooLong { .. } => {
                Severity::Error
            }
            Self::NameTooLong(_) | Self::Lock { .. } => Severity::Normal,
            Self::Stat { .. } | Self::Unsupported(_) | Self::Open { .. } => Severity::Debug,
            Self::Accounting { source, .. } => match source {
                AccountingError::Io(_) => Severity::Error,
                _ => Severity::Normal,
            },
            Self::Timeout(_) | Self::Disconnected(_) | Self::Recv(_) => Severity::Normal,
            Self::Send(_) | Self::Worker(_) => Severity::Error,
            Self::Accept(_) | Self::SlotsClosed => Severity::Critical,
        }
    }

    /// Returns true if the server must shut down.
    pub const fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_error_categories() {
        assert_eq!(
            QuotadError::RelativePath("x".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            QuotadError::Unsupported(PathBuf::from("/dev/null")).category(),
            ErrorCategory::Resolution
        );
        assert_eq!(
            QuotadError::Accounting {
                path: PathBuf::from("/m/maildirsize"),
                source: AccountingError::BadHeader,
            }
            .category(),
            ErrorCategory::Accounting
        );
        assert_eq!(QuotadError::Timeout("command").category(), ErrorCategory::Transport);
        assert_eq!(QuotadError::SlotsClosed.category(), ErrorCategory::Fatal);
    }

    #[test]
    fn fatal_only_for_supervisor_failures() {
        assert!(QuotadError::Accept(io::Error::other("emfile")).is_fatal());
        assert!(!QuotadError::Recv(io::Error::other("reset")).is_fatal());
        assert!(!QuotadError::RequestTooLong { limit: 8192 }.is_fatal());
    }

    #[test]
    fn resolution_misses_log_at_debug() {
        let err = QuotadError::Stat {
            path: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(err.severity(), Severity::Debug);
        assert_eq!(QuotadError::SlotsClosed.severity(), Severity::Critical);
    }

    #[test]
    fn formats_accounting_context() {
        let err = QuotadError::Accounting {
            path: PathBuf::from("/m/maildirsize"),
            source: AccountingError::BadEntry { line: 3 },
        };
        assert_eq!(err.to_string(), "bad quota format at line 3 in /m/maildirsize");
    }
}

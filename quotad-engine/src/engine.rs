//! # Quota Engine Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: Abstract the resolver behind a trait so the server
//!    can run against the filesystem or a test double without changes.
//! 2. **Blocking by Contract**: Implementations may stat, lock and read files;
//!    the server runs them on a blocking thread, never on the reactor.
//! 3. **Typed Misses**: Every reason for not answering is a `QuotadError`; the
//!    server alone decides that all of them become the refusal sentinel.

use std::path::Path;

use quotad_common::QuotadResult;

/// Mailbox layout a query resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// A single mbox file sized directly.
    Mbox,
    /// A maildir summed from its accounting file.
    Maildir,
}

/// Strategy pattern: defines the resolver surface for the server.
pub trait QuotaEngine: Send + Sync {
    /// Returns the usage in bytes for an absolute mailbox path.
    ///
    /// Negative accounting totals are already clamped to zero.
    fn query(&self, path: &Path) -> QuotadResult<u64>;
}

//! Filesystem-backed quota resolver.
//!
//! Regular files are mbox mailboxes and answer with their size; directories
//! are maildirs and answer with the sum of their `maildirsize` entries.

use std::fs::{self, File, Metadata};
use std::path::Path;

use quotad_common::{MAX_REQUEST_LEN, QuotadError, QuotadResult};
use tracing::debug;

use crate::engine::{QuotaEngine, QuotaKind};
use crate::maildirsize::{self, SIDECAR_FILE_NAME};

/// Resolves quota queries against the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEngine;

impl FsEngine {
    /// Creates a filesystem resolver.
    pub fn new() -> Self {
        FsEngine
    }

    /// Stats `path` (following symlinks) and classifies it.
    pub fn classify(&self, path: &Path) -> QuotadResult<(QuotaKind, Metadata)> {
        let meta = fs::metadata(path).map_err(|source| QuotadError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = if meta.is_file() {
            QuotaKind::Mbox
        } else if meta.is_dir() {
            QuotaKind::Maildir
        } else {
            return Err(QuotadError::Unsupported(path.to_path_buf()));
        };
        Ok((kind, meta))
    }

    fn maildir_usage(&self, maildir: &Path) -> QuotadResult<u64> {
        // The sidecar path must still fit a request-sized buffer.
        if maildir.as_os_str().len() + 1 + SIDECAR_FILE_NAME.len() >= MAX_REQUEST_LEN {
            return Err(QuotadError::NameTooLong(maildir.to_path_buf()));
        }
        let sidecar = maildirsize::sidecar_path(maildir);

        fs::metadata(&sidecar).map_err(|source| QuotadError::Stat {
            path: sidecar.clone(),
            source,
        })?;
        let file = File::open(&sidecar).map_err(|source| QuotadError::Open {
            path: sidecar.clone(),
            source,
        })?;

        let sum = maildirsize::sum_locked(&file, &sidecar)?;
        debug!("query for maildirsize {}: {}", sidecar.display(), sum);
        Ok(sum)
    }
}

impl QuotaEngine for FsEngine {
    fn query(&self, path: &Path) -> QuotadResult<u64> {
        let (kind, meta) = self.classify(path)?;
        match kind {
            QuotaKind::Mbox => {
                debug!("query for mbox {}", path.display());
                Ok(meta.len())
            }
            QuotaKind::Maildir => {
                debug!("query for maildir {}", path.display());
                self.maildir_usage(path)
            }
        }
    }
}

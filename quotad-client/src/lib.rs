//! # quotad Client
//!
//! Ask a running quotad for the disk usage of one mailbox.
//!
//! ## Design Principles
//!
//! 1. **One Query, One Connection**: Every query opens its own connection and
//!    reads until the server closes it.
//! 2. **Honest Zero**: A zero reply may be a refusal; the client does not try
//!    to tell them apart.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use quotad_common::{Request, Response};

/// Client bound to one quotad socket.
#[derive(Debug, Clone)]
pub struct QuotaClient {
    socket: PathBuf,
}

impl QuotaClient {
    /// Creates a client for the quotad socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        QuotaClient {
            socket: socket.into(),
        }
    }

    /// Queries the usage of `mailbox` in bytes.
    ///
    /// Returns `Ok(None)` when the server closed the connection without
    /// answering.
    pub async fn query(&self, mailbox: impl AsRef<Path>) -> io::Result<Option<u64>> {
        let request = Request::new(mailbox.as_ref())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        let reply = self.exchange(&request.encode()).await?;
        if reply.is_empty() {
            return Ok(None);
        }
        Response::decode(&reply).map(Some).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed reply {:?}", String::from_utf8_lossy(&reply)),
            )
        })
    }

    /// Sends `bytes` as is and returns everything the server wrote back.
    pub async fn exchange(&self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream.write_all(bytes).await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        Ok(reply)
    }
}

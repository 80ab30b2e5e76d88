//! # Connection Handler
//!
//! Serve exactly one quota request on one connection, then close it.
//!
//! ## Design Principles
//!
//! 1. **One Deadline**: The deadline is fixed at entry; every read and the
//!    final write wait only for the time that remains.
//! 2. **Scoped Connection**: The stream is owned by the handler and dropped on
//!    every path, so it is always closed.
//! 3. **Collapsed Answers**: Anything short of a number is answered with the
//!    refusal sentinel; timeouts, disconnects and overflows get no answer.
//! 4. **Reactor Friendly**: Filesystem work runs on the blocking pool.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use quotad_common::{MAX_REQUEST_LEN, QuotadError, QuotadResult, Request, Response};
use quotad_engine::QuotaEngine;

use crate::framer::{FrameError, LineFramer};
use crate::logging;
use crate::stats::Disposition;

/// Handles one connection end to end and reports how it ended.
pub async fn handle_connection<S, E>(
    mut stream: S,
    engine: Arc<E>,
    timeout: Duration,
) -> Disposition
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: QuotaEngine + ?Sized + 'static,
{
    let deadline = Instant::now() + timeout;
    match exchange(&mut stream, engine, deadline).await {
        Ok(Response::Quota(_)) => Disposition::Answered,
        Ok(Response::Refused) => Disposition::Refused,
        Err(err) => {
            logging::report(&err);
            Disposition::Dropped
        }
    }
}

async fn exchange<S, E>(
    stream: &mut S,
    engine: Arc<E>,
    deadline: Instant,
) -> QuotadResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: QuotaEngine + ?Sized + 'static,
{
    let line = read_request(stream, deadline).await?;
    let response = match Request::from_line(&line) {
        Ok(request) => resolve(engine, request).await,
        Err(err) => {
            logging::report(&err);
            Response::Refused
        }
    };
    send_response(stream, response, deadline).await?;
    Ok(response)
}

/// Reads until one full request line is framed.
pub async fn read_request<S>(stream: &mut S, deadline: Instant) -> QuotadResult<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new(MAX_REQUEST_LEN);
    loop {
        let read = timeout_at(deadline, stream.read(framer.spare_mut()))
            .await
            .map_err(|_| QuotadError::Timeout("command"))?;
        let n = match read {
            Ok(0) => return Err(QuotadError::Disconnected("command")),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(QuotadError::Recv(err)),
        };
        match framer.commit(n) {
            Ok(Some(line)) => return Ok(line),
            Ok(None) => {}
            Err(FrameError::TooLong { limit }) => {
                return Err(QuotadError::RequestTooLong { limit });
            }
        }
    }
}

async fn resolve<E>(engine: Arc<E>, request: Request) -> Response
where
    E: QuotaEngine + ?Sized + 'static,
{
    let path = request.into_path();
    let joined = tokio::task::spawn_blocking(move || engine.query(&path)).await;
    match joined {
        Ok(Ok(bytes)) => Response::Quota(bytes),
        Ok(Err(err)) => {
            logging::report(&err);
            Response::Refused
        }
        Err(err) => {
            logging::report(&QuotadError::Worker(err.to_string()));
            Response::Refused
        }
    }
}

async fn send_response<S>(
    stream: &mut S,
    response: Response,
    deadline: Instant,
) -> QuotadResult<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = response.encode();
    let sent = timeout_at(deadline, async {
        stream.write_all(&encoded).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| QuotadError::Timeout("response"))?;

    match sent {
        Ok(()) => {
            debug!("answered {}", response);
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::WriteZero => {
            Err(QuotadError::Disconnected("response"))
        }
        Err(err) => Err(QuotadError::Send(err)),
    }
}

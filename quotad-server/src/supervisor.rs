//! # Concurrency Supervisor
//!
//! Accept connections and run one worker task per connection, never more
//! than `max_children` at once.
//!
//! ## Design Principles
//!
//! 1. **Gate Before Spawn**: After each accept the supervisor waits for a slot
//!    and only then spawns, so a full pool throttles accepting.
//! 2. **Owned Permits**: A worker owns its permit; the permit returns to the
//!    pool when the task ends, panics included.
//! 3. **Contained Failures**: Worker failures stay in the worker. Only accept
//!    and slot failures stop the supervisor.
//! 4. **Reaping**: Finished workers are collected every iteration; on exit the
//!    supervisor waits for the ones still running.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use quotad_common::{QuotadError, QuotadResult};
use quotad_engine::QuotaEngine;

use crate::logging;
use crate::server::handle_connection;
use crate::stats::{Disposition, ServerStats};

/// Accept loop with a bounded worker pool.
pub struct Supervisor<E: ?Sized> {
    listener: UnixListener,
    engine: Arc<E>,
    slots: Arc<Semaphore>,
    timeout: Duration,
    stats: Arc<ServerStats>,
}

impl<E> Supervisor<E>
where
    E: QuotaEngine + ?Sized + 'static,
{
    /// Creates a supervisor over a bound, listening socket.
    pub fn new(
        listener: UnixListener,
        engine: Arc<E>,
        max_children: usize,
        timeout: Duration,
    ) -> Self {
        Supervisor {
            listener,
            engine,
            slots: Arc::new(Semaphore::new(max_children)),
            timeout,
            stats: Arc::new(ServerStats::new()),
        }
    }

    /// Returns the counters shared with the workers.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serves until a fatal error.
    pub async fn run(self) -> QuotadResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves or a fatal error occurs, then waits
    /// for running workers.
    pub async fn run_until<F>(self, shutdown: F) -> QuotadResult<()>
    where
        F: Future<Output = ()>,
    {
        info!("server started");
        let mut workers = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            while let Some(joined) = workers.try_join_next() {
                reap(joined);
            }

            let stream = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => match escalate(QuotadError::Accept(err)) {
                        Ok(()) => continue,
                        Err(err) => break Err(err),
                    },
                },
            };

            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => match escalate(QuotadError::SlotsClosed) {
                        Ok(()) => continue,
                        Err(err) => break Err(err),
                    },
                },
            };

            log_peer(&stream);
            let engine = Arc::clone(&self.engine);
            let stats = Arc::clone(&self.stats);
            let timeout = self.timeout;
            workers.spawn(async move {
                let _permit = permit;
                let inflight = Inflight::start(&stats);
                let disposition = handle_connection(stream, engine, timeout).await;
                inflight.finish(disposition);
            });
        };

        if let Err(err) = &result {
            logging::report(err);
        }
        while let Some(joined) = workers.join_next().await {
            reap(joined);
        }
        debug!(stats = ?self.stats.snapshot(), "server stopped");
        result
    }
}

/// Passes fatal errors up; anything else is logged and the loop goes on.
fn escalate(err: QuotadError) -> QuotadResult<()> {
    if err.is_fatal() {
        return Err(err);
    }
    logging::report(&err);
    Ok(())
}

fn log_peer(stream: &UnixStream) {
    match stream.peer_cred() {
        Ok(cred) => debug!(uid = cred.uid(), pid = ?cred.pid(), "accepted connection"),
        Err(_) => debug!("accepted connection"),
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!("worker panicked: {err}");
        }
    }
}

/// Keeps `inflight` balanced even if the worker unwinds.
struct Inflight<'a> {
    stats: &'a ServerStats,
    done: bool,
}

impl<'a> Inflight<'a> {
    fn start(stats: &'a ServerStats) -> Self {
        stats.record_start();
        Inflight { stats, done: false }
    }

    fn finish(mut self, disposition: Disposition) {
        self.done = true;
        self.stats.record_end(disposition);
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.stats.record_end(Disposition::Dropped);
        }
    }
}

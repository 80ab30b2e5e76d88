//! # quotad
//!
//! Answer "how many bytes does this mailbox use?" over a Unix domain socket.
//!
//! ## Design Principles
//!
//! 1. **Privileged Setup First**: The socket, pidfile and log file are opened
//!    as the starting user; privileges are dropped before serving.
//! 2. **Fork Before Threads**: Daemonizing happens before the tokio runtime
//!    spawns its workers.
//! 3. **Fail Loudly at Startup**: Any setup failure is printed and the process
//!    exits non-zero.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use quotad_common::Severity;
use quotad_engine::FsEngine;
use quotad_server::daemon::{self, Pidfile};
use quotad_server::logging::{self, LogSink};
use quotad_server::{Config, Supervisor, listener};

fn main() -> ExitCode {
    let config = Config::parse();
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logging::emit(Severity::Critical, format_args!("{err:#}"));
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    let sink = LogSink::open(&config.log_target())?;
    let user = daemon::lookup_user(&config.user)?;
    let pidfile = config
        .pidfile
        .as_deref()
        .map(Pidfile::create)
        .transpose()?;

    let std_listener = listener::bind(&config.socket, config.mode)
        .with_context(|| format!("failed to bind socket {}", config.socket.display()))?;

    daemon::drop_privileges(&user)?;
    if !config.foreground {
        daemon::daemonize()?;
    }
    sink.install(config.debug)?;

    if let Some(pidfile) = pidfile {
        pidfile.write_pid(std::process::id())?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(serve(config, std_listener))
}

async fn serve(
    config: Config,
    std_listener: std::os::unix::net::UnixListener,
) -> anyhow::Result<()> {
    let listener = UnixListener::from_std(std_listener).context("failed to register socket")?;

    // Reload and user signals are accepted and ignored.
    let mut ignored = Vec::new();
    for kind in [
        SignalKind::hangup(),
        SignalKind::user_defined1(),
        SignalKind::user_defined2(),
    ] {
        ignored.push(signal(kind).context("failed to install signal handler")?);
    }
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install signal handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install signal handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = interrupt.recv() => info!("received SIGINT"),
        }
    };

    info!(
        socket = %config.socket.display(),
        user = %config.user,
        max_children = config.max_children,
        timeout_ms = config.timeout,
        "starting quotad"
    );
    let supervisor = Supervisor::new(
        listener,
        Arc::new(FsEngine::new()),
        config.max_children,
        config.timeout(),
    );
    supervisor.run_until(shutdown).await?;
    drop(ignored);
    Ok(())
}

//! # Logging Sink
//!
//! Configure the process-wide `tracing` subscriber once at startup and map
//! quotad severities onto tracing levels.
//!
//! ## Design Principles
//!
//! 1. **Configured Once**: The sink is opened before privileges are dropped and
//!    installed after daemonizing; it is read-only afterwards.
//! 2. **Serialized Appends**: File records are written under an exclusive
//!    `flock`, so several processes can share one log file.
//! 3. **Severity Mapping**: debug → DEBUG, normal → INFO, error → ERROR,
//!    critical → ERROR on the `quotad::critical` target with `critical = true`.
//! 4. **Syslog Priorities**: The syslog sink picks the priority per record
//!    from its level and target: DEBUG → debug, INFO → notice, ERROR → err,
//!    critical → crit.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use fs4::FileExt;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing::{Level, Metadata};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use quotad_common::{QuotadError, Severity};

/// Environment variable overriding the default log filter.
pub const FILTER_ENV: &str = "QUOTAD_LOG";

/// Target carried by critical records.
pub const CRITICAL_TARGET: &str = "quotad::critical";

/// Identity and facility used for syslog records.
pub const SYSLOG_IDENT: &str = "exim-quotad";
pub const SYSLOG_FACILITY: Facility = Facility::LOG_MAIL;

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Logging is off.
    Disabled,
    /// Records go to standard error.
    Stderr,
    /// Records go to the local syslog daemon.
    Syslog,
    /// Records are appended to a file.
    File(PathBuf),
}

impl LogTarget {
    /// Interprets the `--log` argument: absent disables, `-` is stderr,
    /// `syslog` is syslog, anything else is a file path.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None => Self::Disabled,
            Some("-") => Self::Stderr,
            Some("syslog") => Self::Syslog,
            Some(path) => Self::File(PathBuf::from(path)),
        }
    }
}

/// Append-mode log file guarded by an exclusive `flock` per record.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Opens (creating if needed) `path` for appending.
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LockedFile { file })
    }

    fn lock(&self) -> io::Result<()> {
        loop {
            match FileExt::lock_exclusive(&self.file) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn unlock(&self) -> io::Result<()> {
        loop {
            match FileExt::unlock(&self.file) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl Write for &LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?;
        let written = (&self.file).write_all(buf);
        let unlocked = self.unlock();
        written?;
        unlocked?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.file).flush()
    }
}

impl<'a> MakeWriter<'a> for LockedFile {
    type Writer = &'a LockedFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Syslog priority of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Debug,
    Notice,
    Err,
    Crit,
}

impl Priority {
    /// Maps a record's level and target onto a syslog priority.
    pub fn of(level: &Level, target: &str) -> Self {
        if *level == Level::ERROR {
            if target == CRITICAL_TARGET {
                Self::Crit
            } else {
                Self::Err
            }
        } else if *level <= Level::INFO {
            Self::Notice
        } else {
            Self::Debug
        }
    }
}

/// Connection to the local syslog daemon.
pub struct SyslogSink {
    logger: Mutex<Logger<LoggerBackend, Formatter3164>>,
}

impl fmt::Debug for SyslogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyslogSink").finish_non_exhaustive()
    }
}

impl SyslogSink {
    /// Connects to the local syslog socket as `exim-quotad` on `LOG_MAIL`.
    pub fn connect() -> io::Result<Self> {
        let formatter = Formatter3164 {
            facility: SYSLOG_FACILITY,
            hostname: None,
            process: SYSLOG_IDENT.to_string(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter).map_err(|err| io::Error::other(err.to_string()))?;
        Ok(SyslogSink {
            logger: Mutex::new(logger),
        })
    }

    fn send(&self, priority: Priority, message: &str) -> io::Result<()> {
        let mut logger = self.logger.lock().unwrap_or_else(PoisonError::into_inner);
        let sent = match priority {
            Priority::Debug => logger.debug(message),
            Priority::Notice => logger.notice(message),
            Priority::Err => logger.err(message),
            Priority::Crit => logger.crit(message),
        };
        sent.map_err(|err| io::Error::other(err.to_string()))
    }
}

/// Writer for one record at a fixed priority.
pub struct SyslogRecord<'a> {
    sink: &'a SyslogSink,
    priority: Priority,
}

impl Write for SyslogRecord<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let message = text.trim_end_matches('\n');
        if !message.is_empty() {
            self.sink.send(self.priority, message)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SyslogSink {
    type Writer = SyslogRecord<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogRecord {
            sink: self,
            priority: Priority::Notice,
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogRecord {
            sink: self,
            priority: Priority::of(meta.level(), meta.target()),
        }
    }
}

/// An opened but not yet installed sink.
#[derive(Debug)]
pub enum LogSink {
    Disabled,
    Stderr,
    Syslog(SyslogSink),
    File(LockedFile),
}

impl LogSink {
    /// Opens the sink; file targets are opened here so that the file is
    /// created with the startup user's permissions.
    pub fn open(target: &LogTarget) -> anyhow::Result<Self> {
        Ok(match target {
            LogTarget::Disabled => Self::Disabled,
            LogTarget::Stderr => Self::Stderr,
            LogTarget::Syslog => {
                Self::Syslog(SyslogSink::connect().context("failed to connect to syslog")?)
            }
            LogTarget::File(path) => Self::File(LockedFile::open(path).with_context(|| {
                format!("failed to open logfile {} in append mode", path.display())
            })?),
        })
    }

    /// Installs the global subscriber. Debug records pass only with `debug`.
    pub fn install(self, debug: bool) -> anyhow::Result<()> {
        let filter = || {
            EnvFilter::try_from_env(FILTER_ENV)
                .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
        };
        let installed = match self {
            Self::Disabled => return Ok(()),
            Self::Stderr => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(io::stderr)
                .try_init(),
            Self::Syslog(sink) => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_target(false)
                .with_writer(sink)
                .try_init(),
            Self::File(file) => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(file)
                .try_init(),
        };
        installed.map_err(|err| anyhow::anyhow!("failed to install logger: {err}"))
    }
}

/// Emits `message` at the given severity.
pub fn emit(severity: Severity, message: fmt::Arguments<'_>) {
    match severity {
        Severity::Debug => tracing::debug!("{message}"),
        Severity::Normal => tracing::info!("{message}"),
        Severity::Error => tracing::error!("{message}"),
        Severity::Critical => {
            tracing::error!(target: CRITICAL_TARGET, critical = true, "{message}")
        }
    }
}

/// Logs an error at its own severity.
pub fn report(err: &QuotadError) {
    emit(err.severity(), format_args!("{err}"));
}

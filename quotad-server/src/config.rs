//! Command-line configuration for the quotad daemon.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Semaphore;

use crate::logging::LogTarget;

/// Default per-request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default number of concurrently running workers.
pub const DEFAULT_MAX_CHILDREN: usize = 20;

/// Longest socket path accepted by `sockaddr_un` (NUL excluded).
pub const MAX_SOCKET_PATH: usize = 107;

/// Answers mailbox disk usage queries over a Unix socket.
#[derive(Debug, Clone, Parser)]
#[command(name = "quotad", version)]
pub struct Config {
    /// Creates the listening socket at <path>
    #[arg(
        short,
        long,
        env = "QUOTAD_SOCKET",
        value_name = "path",
        value_parser = parse_socket_path
    )]
    pub socket: PathBuf,

    /// Socket file mode, in octal
    #[arg(short, long, value_name = "mode", default_value = "666", value_parser = parse_mode)]
    pub mode: u32,

    /// Runs as <user> once the socket is bound
    #[arg(short, long, value_name = "user", default_value = "mail")]
    pub user: String,

    /// Writes the daemon pid to <path>
    #[arg(short, long, value_name = "path")]
    pub pidfile: Option<PathBuf>,

    /// Stays in the foreground instead of daemonizing
    #[arg(short, long)]
    pub foreground: bool,

    /// Enables debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Appends log records to <path>, to stderr with `-`, or to `syslog`
    #[arg(short, long, env = "QUOTAD_LOG_FILE", value_name = "path")]
    pub log: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(short, long, value_name = "msecs", default_value_t = DEFAULT_TIMEOUT_MS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Upper bound on concurrently running workers
    #[arg(short = 'c', long, value_name = "num", default_value_t = DEFAULT_MAX_CHILDREN,
          value_parser = parse_positive)]
    pub max_children: usize,
}

impl Config {
    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Returns the configured log destination.
    pub fn log_target(&self) -> LogTarget {
        LogTarget::from_arg(self.log.as_deref())
    }
}

fn parse_mode(raw: &str) -> Result<u32, String> {
    match u32::from_str_radix(raw, 8) {
        Ok(mode) if (1..=0o777).contains(&mode) => Ok(mode),
        _ => Err(format!("bad socket mode {raw}")),
    }
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if (1..=Semaphore::MAX_PERMITS).contains(&n) => Ok(n),
        _ => Err(format!("bad max-children count {raw}")),
    }
}

fn parse_socket_path(raw: &str) -> Result<PathBuf, String> {
    if raw.is_empty() {
        return Err("socket path is empty".to_string());
    }
    if raw.len() > MAX_SOCKET_PATH {
        return Err("socket name too long".to_string());
    }
    Ok(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config = Config::try_parse_from(["quotad", "-s", "/run/quotad.sock"]).unwrap();
        assert_eq!(config.socket, PathBuf::from("/run/quotad.sock"));
        assert_eq!(config.mode, 0o666);
        assert_eq!(config.user, "mail");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_children, 20);
        assert!(!config.foreground);
        assert_eq!(config.log_target(), LogTarget::Disabled);
    }

    #[test]
    fn parses_long_options() {
        let config = Config::try_parse_from([
            "quotad",
            "--socket",
            "/tmp/q.sock",
            "--mode",
            "660",
            "--max-children",
            "4",
            "--timeout",
            "250",
            "--foreground",
            "--debug",
            "--log",
            "-",
        ])
        .unwrap();
        assert_eq!(config.mode, 0o660);
        assert_eq!(config.max_children, 4);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(config.foreground && config.debug);
        assert_eq!(config.log_target(), LogTarget::Stderr);
    }

    #[test]
    fn accepts_syslog_and_largest_pool() {
        let max = Semaphore::MAX_PERMITS.to_string();
        let config =
            Config::try_parse_from(["quotad", "-s", "/q", "-l", "syslog", "-c", max.as_str()])
                .unwrap();
        assert_eq!(config.log_target(), LogTarget::Syslog);
        assert_eq!(config.max_children, Semaphore::MAX_PERMITS);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::try_parse_from(["quotad", "-s", "/q", "-m", "1000"]).is_err());
        assert!(Config::try_parse_from(["quotad", "-s", "/q", "-m", "9"]).is_err());
        assert!(Config::try_parse_from(["quotad", "-s", "/q", "-t", "0"]).is_err());
        assert!(Config::try_parse_from(["quotad", "-s", "/q", "-c", "0"]).is_err());
        let too_many = (Semaphore::MAX_PERMITS + 1).to_string();
        assert!(Config::try_parse_from(["quotad", "-s", "/q", "-c", too_many.as_str()]).is_err());
        let long = format!("/{}", "s".repeat(MAX_SOCKET_PATH));
        assert!(Config::try_parse_from(["quotad", "-s", long.as_str()]).is_err());
    }
}

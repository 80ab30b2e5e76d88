//! # quotad Server
//!
//! Answer mailbox quota queries over a Unix socket: one path in, one decimal
//! byte count out, one worker task per connection.

pub mod config;
pub mod daemon;
pub mod framer;
pub mod listener;
pub mod logging;
pub mod server;
pub mod stats;
pub mod supervisor;

pub use config::Config;
pub use stats::{Disposition, ServerStats, StatsSnapshot};
pub use supervisor::Supervisor;

// quotad-common - Shared types and protocol definitions for quotad
//
// This crate defines the wire protocol and the error taxonomy shared by the
// resolver engine and the socket server.

pub mod error;
pub mod protocol;

// Re-export for convenience
pub use error::*;
pub use protocol::*;

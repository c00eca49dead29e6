//! Server-side Memcache ASCII protocol.
//!
//! [`AsciiProtocol::handle_received_data`] parses exactly one command out
//! of a receive buffer, drives the [`Cache`](cache_core::Cache)
//! collaborator, serializes the reply into a send buffer and returns a
//! [`Verdict`] telling the session loop what to do next. Parsing is
//! in-place: keys and values are read straight out of the receive buffer.
//!
//! Failures never leak partial output: the handler rolls the send buffer
//! back to its entry savepoint before writing an error line, and an
//! incomplete request rewinds the receive cursor so the command is
//! re-parsed once more bytes arrive.

mod ascii;
mod command;
mod error;
mod parse;

pub use ascii::{AsciiProtocol, ProtocolConfig, Verdict, VERSION_STRING};
pub use command::Command;
pub use error::ProtocolError;

//! The cache server: configuration, logging, and the session loop that
//! connects TCP sockets to the ASCII protocol handler.

pub mod config;
pub mod logging;

mod connection;
mod server;

pub use config::Config;
pub use server::{Server, ShutdownHandle};

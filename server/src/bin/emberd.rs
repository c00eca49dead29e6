//! `emberd`, the cache server binary.

use clap::Parser;
use ember_server::{logging, Config, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "emberd", about = "Memcached-compatible in-memory cache server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Arena size in bytes, overriding the configuration file.
    #[arg(long)]
    arena_size: Option<usize>,
}

fn main() {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("emberd: {err}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(arena_size) = args.arena_size {
        config.cache.arena_size = arena_size;
    }

    logging::init(&config.logging);

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to start");
            std::process::exit(1);
        }
    };
    if let Err(err) = server.run() {
        error!(%err, "server terminated");
        std::process::exit(1);
    }
}

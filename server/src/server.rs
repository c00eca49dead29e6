//! Single-threaded mio event loop: accept, read, handle, flush.
//!
//! Shared-nothing by construction: the one worker owns the cache, every
//! connection and both of each connection's buffers. Scaling out means
//! running more processes (or more workers, each with its own arena).

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cache_core::{ArenaCache, ArenaCacheConfig};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use protocol_memcache::{AsciiProtocol, ProtocolConfig};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::connection::{Connection, Drive};

const WAKER: Token = Token(0);
const LISTENER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

/// Requests the event loop to stop from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the server to stop after the current poll iteration.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// The server: listener, poll registry and per-connection state.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Vec<Option<Connection>>,
    protocol: AsciiProtocol,
    cache: ArenaCache,
    config: Config,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind the listener and prepare the event loop.
    pub fn bind(config: Config) -> io::Result<Server> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let mut listener = TcpListener::bind(config.listen)?;
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let cache = ArenaCache::new(ArenaCacheConfig {
            arena_size: config.cache.arena_size,
        });
        let protocol = AsciiProtocol::new(ProtocolConfig {
            max_value_size: config.cache.max_value_size,
        });

        Ok(Server {
            poll,
            listener,
            local_addr,
            connections: Vec::new(),
            protocol,
            cache,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// The address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops `run` from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Drive the event loop until shutdown is requested.
    pub fn run(&mut self) -> io::Result<()> {
        info!(listen = %self.local_addr, arena_size = self.config.cache.arena_size, "server running");
        let mut events = Events::with_capacity(256);
        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
            for event in events.iter() {
                match event.token() {
                    WAKER => {}
                    LISTENER => self.accept_ready(),
                    Token(token) => {
                        let index = token - FIRST_CONNECTION;
                        self.connection_ready(index, event.is_readable(), event.is_writable());
                    }
                }
            }
            if self.shutdown.load(Ordering::Acquire) {
                info!("shutting down");
                return Ok(());
            }
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.register_connection(stream, peer) {
                        error!(%peer, %err, "failed to register connection");
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_connection(
        &mut self,
        stream: mio::net::TcpStream,
        peer: SocketAddr,
    ) -> io::Result<()> {
        let index = match self.connections.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                self.connections.push(None);
                self.connections.len() - 1
            }
        };
        let mut connection = Connection::new(stream, peer, &self.config.buffers);
        self.poll.registry().register(
            connection.stream_mut(),
            Token(index + FIRST_CONNECTION),
            Interest::READABLE,
        )?;
        debug!(%peer, index, "connection accepted");
        self.connections[index] = Some(connection);
        Ok(())
    }

    fn connection_ready(&mut self, index: usize, readable: bool, writable: bool) {
        let Some(connection) = self.connections.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        let mut drive = Ok(Drive::Keep);
        if writable {
            drive = connection.on_writable();
        }
        if readable && matches!(drive, Ok(Drive::Keep)) {
            drive = connection.on_readable(&self.protocol, &mut self.cache);
        }

        match drive {
            Ok(Drive::Keep) => {
                // poll for writability only while a flush is pending
                let interest = if connection.wants_write() {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                let token = Token(index + FIRST_CONNECTION);
                if let Err(err) =
                    self.poll
                        .registry()
                        .reregister(connection.stream_mut(), token, interest)
                {
                    error!(peer = %connection.peer(), %err, "reregister failed");
                    self.close_connection(index);
                }
            }
            Ok(Drive::Close) => self.close_connection(index),
            Err(err) => {
                debug!(peer = %connection.peer(), %err, "connection error");
                self.close_connection(index);
            }
        }
    }

    fn close_connection(&mut self, index: usize) {
        if let Some(mut connection) = self.connections[index].take() {
            let _ = self.poll.registry().deregister(connection.stream_mut());
            debug!(peer = %connection.peer(), index, "connection closed");
        }
    }
}

//! Per-connection state and the command cycle.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use cache_core::ArenaCache;
use io_buffer::IoBuffer;
use mio::net::TcpStream;
use protocol_memcache::{AsciiProtocol, Verdict};
use tracing::{debug, warn};

use crate::config::BufferSection;

/// Bytes requested from the receive buffer per socket read.
const READ_CHUNK: usize = 4096;

/// What the event loop should do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drive {
    Keep,
    Close,
}

/// One client connection: socket plus its receive/send buffer pair.
pub(crate) struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    recv: IoBuffer,
    send: IoBuffer,
    /// Close once the send buffer drains (set by `quit` or peer EOF).
    closing: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, buffers: &BufferSection) -> Self {
        Self {
            stream,
            peer,
            recv: IoBuffer::new(buffers.initial_size, buffers.max_size),
            send: IoBuffer::new(buffers.initial_size, buffers.max_size),
            closing: false,
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True when flushing is still pending and the poll registration
    /// needs write interest.
    pub fn wants_write(&self) -> bool {
        self.send.unread() > 0
    }

    /// Socket is readable: pull bytes, run command cycles, flush.
    pub fn on_readable(
        &mut self,
        protocol: &AsciiProtocol,
        cache: &mut ArenaCache,
    ) -> io::Result<Drive> {
        let mut peer_closed = false;
        loop {
            let dest = match self.recv.begin_write(READ_CHUNK) {
                Ok(dest) => dest,
                Err(err) => {
                    // a single frame outgrew the buffer ceiling
                    warn!(peer = %self.peer, %err, "receive buffer exhausted, dropping connection");
                    return Ok(Drive::Close);
                }
            };
            match self.stream.read(dest) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => self.recv.confirm_write(n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        self.process(protocol, cache);
        self.flush()?;

        if peer_closed || (self.closing && self.send.unread() == 0) {
            return Ok(Drive::Close);
        }
        Ok(Drive::Keep)
    }

    /// Socket became writable again: continue flushing.
    pub fn on_writable(&mut self) -> io::Result<Drive> {
        self.flush()?;
        if self.closing && self.send.unread() == 0 {
            return Ok(Drive::Close);
        }
        Ok(Drive::Keep)
    }

    /// Run command cycles while they make progress, then reclaim the
    /// consumed prefix of the receive buffer.
    fn process(&mut self, protocol: &AsciiProtocol, cache: &mut ArenaCache) {
        if self.closing {
            return;
        }
        loop {
            let before = self.recv.unread();
            match protocol.handle_received_data(&mut self.recv, &mut self.send, cache) {
                Verdict::CloseImmediately => {
                    debug!(peer = %self.peer, "quit");
                    self.closing = true;
                    break;
                }
                // no progress without more bytes from the socket
                Verdict::ReadMore if self.recv.unread() == before => break,
                Verdict::ReadMore | Verdict::SendReplyAndRead => {
                    if self.recv.unread() == 0 {
                        break;
                    }
                }
            }
        }
        self.recv.compact();
    }

    /// Write as much of the send buffer as the socket accepts.
    fn flush(&mut self) -> io::Result<()> {
        while self.send.unread() > 0 {
            match self.stream.write(self.send.unread_slice()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.send.confirm_read(n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if self.send.unread() == 0 {
            self.send.compact();
        }
        Ok(())
    }
}

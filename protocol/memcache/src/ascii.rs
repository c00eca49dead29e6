//! The ASCII protocol state machine.

use cache_core::{hash_key, Cache, CacheError, Response, StorageCommand};
use io_buffer::{IoBuffer, Span};

use crate::command::Command;
use crate::error::{ErrorClass, ProtocolError};
use crate::parse::{maybe_noreply, parse_i64, parse_u32, parse_u64, validate_key, Tokens};

/// Version token emitted by the `version` command.
pub const VERSION_STRING: &str = concat!("ember ", env!("CARGO_PKG_VERSION"));

const CRLF: &[u8] = b"\r\n";

/// What the session loop should do after one command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to send yet; wait for more bytes.
    ReadMore,
    /// Flush the send buffer, then read the next command.
    SendReplyAndRead,
    /// Drop the connection without sending anything.
    CloseImmediately,
}

/// Protocol-level limits.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolConfig {
    /// Largest value payload a storage command may declare.
    pub max_value_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_value_size: 1024 * 1024,
        }
    }
}

/// Parser/serializer for the memcached text protocol.
///
/// Stateless per call: each invocation of
/// [`handle_received_data`](Self::handle_received_data) handles at most one
/// command and leaves all cross-command state in the two buffers.
#[derive(Debug, Default)]
pub struct AsciiProtocol {
    config: ProtocolConfig,
}

impl AsciiProtocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Parse one command from `recv`, drive `cache`, serialize the reply
    /// into `send`.
    ///
    /// This is the recovery boundary: on any failure the send buffer is
    /// rolled back to its entry state before an error line (if any) is
    /// written, so a partial reply never escapes. An incomplete request
    /// additionally rewinds the receive cursor.
    pub fn handle_received_data<C: Cache>(
        &self,
        recv: &mut IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Verdict {
        let read_sp = recv.read_savepoint();
        let write_sp = send.write_savepoint();
        match self.run_command(recv, send, cache) {
            Ok(verdict) => verdict,
            Err(err) => {
                send.rollback_write(write_sp);
                match err.class() {
                    ErrorClass::Incomplete => {
                        recv.rollback_read(read_sp);
                        Verdict::ReadMore
                    }
                    ErrorClass::Broken => {
                        recv.reset();
                        let _ = write_bytes(send, b"ERROR\r\n");
                        Verdict::SendReplyAndRead
                    }
                    ErrorClass::ClientStructural => {
                        recv.reset();
                        let _ = write_error_line(send, "CLIENT_ERROR", &err);
                        Verdict::SendReplyAndRead
                    }
                    ErrorClass::ClientNumeric => {
                        let _ = write_error_line(send, "CLIENT_ERROR", &err);
                        Verdict::SendReplyAndRead
                    }
                    ErrorClass::Server => {
                        let _ = write_error_line(send, "SERVER_ERROR", &err);
                        Verdict::SendReplyAndRead
                    }
                }
            }
        }
    }

    fn run_command<C: Cache>(
        &self,
        recv: &mut IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        // one line: <command> [args...]\r\n
        let header = recv
            .try_read_until(CRLF)
            .ok_or(ProtocolError::IncompleteRequest)?;
        let line = header.rtrim_n(CRLF.len());

        let mut tokens = Tokens::new(line);
        let name = tokens.next(recv);
        let command =
            Command::parse(recv.slice(name)).ok_or(ProtocolError::BrokenRequest)?;
        let args = tokens.rest();

        match command {
            Command::Get => self.retrieval(false, args, recv, send, cache),
            Command::Gets => self.retrieval(true, args, recv, send, cache),
            Command::Set
            | Command::Add
            | Command::Replace
            | Command::Append
            | Command::Prepend
            | Command::Cas => {
                let cmd = command.storage().expect("storage command");
                self.storage(cmd, args, recv, send, cache)
            }
            Command::Delete => self.delete(args, recv, send, cache),
            Command::Incr | Command::Decr => {
                let cmd = command.arithmetic().expect("arithmetic command");
                self.arithmetic(cmd, args, recv, send, cache)
            }
            Command::Touch => self.touch(args, recv, send, cache),
            Command::Stats => self.statistics(args, recv, send, cache),
            Command::Version => self.version(args, send),
            Command::FlushAll => self.flush_all(args, recv, send, cache),
            Command::Quit => Ok(Verdict::CloseImmediately),
        }
    }

    /// `get`/`gets`: one VALUE block per hit, then END.
    fn retrieval<C: Cache>(
        &self,
        with_cas: bool,
        args: Span,
        recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let mut tokens = Tokens::new(args);
        loop {
            let key = recv.slice(tokens.next(recv));
            validate_key(key)?;
            if let Some(item) = cache.get(key, hash_key(key)) {
                write_bytes(send, b"VALUE ")?;
                write_bytes(send, item.key)?;
                write_bytes(send, b" ")?;
                write_uint(send, item.flags as u64)?;
                write_bytes(send, b" ")?;
                write_uint(send, item.value.len() as u64)?;
                if with_cas {
                    write_bytes(send, b" ")?;
                    write_uint(send, item.version)?;
                }
                write_bytes(send, CRLF)?;
                write_bytes(send, item.value)?;
                write_bytes(send, CRLF)?;
            }
            if tokens.rest().is_empty() {
                break;
            }
        }
        write_bytes(send, b"END\r\n")?;
        Ok(Verdict::SendReplyAndRead)
    }

    /// `set`/`add`/`replace`/`append`/`prepend`/`cas`:
    /// `<cmd> <key> <flags> <exptime> <bytes> [cas] [noreply]\r\n<value>\r\n`
    fn storage<C: Cache>(
        &self,
        cmd: StorageCommand,
        args: Span,
        recv: &mut IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let mut tokens = Tokens::new(args);
        let key_span = tokens.next(recv);
        validate_key(recv.slice(key_span))?;
        let flags = parse_u32(recv.slice(tokens.next(recv)))?;
        let exptime = parse_i64(recv.slice(tokens.next(recv)))?;
        let value_len = parse_u32(recv.slice(tokens.next(recv)))? as usize;
        if value_len > self.config.max_value_size {
            return Err(ProtocolError::ValueLength);
        }
        let cas = if cmd == StorageCommand::Cas {
            parse_u64(recv.slice(tokens.next(recv)))?
        } else {
            0
        };
        let noreply = maybe_noreply(recv.slice(tokens.rest()))?;

        // the value plus its CRLF terminator must be fully buffered
        let total = value_len + CRLF.len();
        if recv.unread() < total {
            // pre-grow so the session loop can receive the whole value
            recv.ensure_capacity(total - recv.unread())?;
            return Err(ProtocolError::IncompleteRequest);
        }
        let value_span = recv.confirm_read(total);
        let value = recv.slice(value_span);
        if !value.ends_with(CRLF) {
            return Err(ProtocolError::ValueCrlfExpected);
        }
        let value = &value[..value_len];
        let key = recv.slice(key_span);
        let hash = hash_key(key);

        let mut item = match cache.create_item(key, hash, value_len, flags, exptime, cas) {
            Ok(item) => item,
            // arena exhausted: the storage outcome is NOT_STORED
            Err(CacheError::OutOfMemory) => return self.reply(send, Response::NotStored, noreply),
            Err(err) => return Err(err.into()),
        };
        cache.assign_value(&mut item, value);
        let response = cache.store(cmd, item)?;
        self.reply(send, response, noreply)
    }

    /// `delete <key> [noreply]`
    fn delete<C: Cache>(
        &self,
        args: Span,
        recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let mut tokens = Tokens::new(args);
        let key = recv.slice(tokens.next(recv));
        validate_key(key)?;
        let noreply = maybe_noreply(recv.slice(tokens.rest()))?;
        let response = cache.delete(key, hash_key(key));
        self.reply(send, response, noreply)
    }

    /// `incr|decr <key> <delta> [noreply]`
    fn arithmetic<C: Cache>(
        &self,
        cmd: cache_core::ArithmeticCommand,
        args: Span,
        recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let mut tokens = Tokens::new(args);
        let key = recv.slice(tokens.next(recv));
        validate_key(key)?;
        let delta = parse_u64(recv.slice(tokens.next(recv)))?;
        let noreply = maybe_noreply(recv.slice(tokens.rest()))?;
        let (response, new_value) = cache.arithmetic(cmd, key, hash_key(key), delta)?;
        if noreply {
            return Ok(Verdict::ReadMore);
        }
        if response == Response::Stored {
            write_uint(send, new_value)?;
        } else {
            write_bytes(send, response.as_bytes())?;
        }
        write_bytes(send, CRLF)?;
        Ok(Verdict::SendReplyAndRead)
    }

    /// `touch <key> <exptime> [noreply]`
    fn touch<C: Cache>(
        &self,
        args: Span,
        recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let mut tokens = Tokens::new(args);
        let key = recv.slice(tokens.next(recv));
        validate_key(key)?;
        let exptime = parse_i64(recv.slice(tokens.next(recv)))?;
        let noreply = maybe_noreply(recv.slice(tokens.rest()))?;
        let response = cache.touch(key, hash_key(key), exptime);
        self.reply(send, response, noreply)
    }

    /// `stats` (no arguments): one STAT line per registered metric.
    fn statistics<C: Cache>(
        &self,
        args: Span,
        _recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        if !args.is_empty() {
            return Err(ProtocolError::NotImplemented);
        }
        cache.publish_stats();
        for metric in metriken::metrics().iter() {
            let name = metric.name();
            if name.is_empty() {
                continue;
            }
            let Some(value) = metric.value() else {
                continue;
            };
            match value {
                metriken::Value::Counter(v) => {
                    write_bytes(send, b"STAT ")?;
                    write_bytes(send, name.as_bytes())?;
                    write_bytes(send, b" ")?;
                    write_uint(send, v)?;
                    write_bytes(send, CRLF)?;
                }
                metriken::Value::Gauge(v) => {
                    write_bytes(send, b"STAT ")?;
                    write_bytes(send, name.as_bytes())?;
                    write_bytes(send, b" ")?;
                    write_int(send, v)?;
                    write_bytes(send, CRLF)?;
                }
                _ => {}
            }
        }
        write_bytes(send, b"END\r\n")?;
        Ok(Verdict::SendReplyAndRead)
    }

    /// `version` (no arguments)
    fn version(&self, args: Span, send: &mut IoBuffer) -> Result<Verdict, ProtocolError> {
        if !args.is_empty() {
            return Err(ProtocolError::CrlfExpected);
        }
        write_bytes(send, b"VERSION ")?;
        write_bytes(send, VERSION_STRING.as_bytes())?;
        write_bytes(send, CRLF)?;
        Ok(Verdict::SendReplyAndRead)
    }

    /// `flush_all [noreply]`
    fn flush_all<C: Cache>(
        &self,
        args: Span,
        recv: &IoBuffer,
        send: &mut IoBuffer,
        cache: &mut C,
    ) -> Result<Verdict, ProtocolError> {
        let noreply = maybe_noreply(recv.slice(args))?;
        cache.flush_all();
        if noreply {
            return Ok(Verdict::ReadMore);
        }
        write_bytes(send, b"OK\r\n")?;
        Ok(Verdict::SendReplyAndRead)
    }

    fn reply(
        &self,
        send: &mut IoBuffer,
        response: Response,
        noreply: bool,
    ) -> Result<Verdict, ProtocolError> {
        if noreply {
            return Ok(Verdict::ReadMore);
        }
        write_bytes(send, response.as_bytes())?;
        write_bytes(send, CRLF)?;
        Ok(Verdict::SendReplyAndRead)
    }
}

fn write_bytes(send: &mut IoBuffer, bytes: &[u8]) -> Result<(), ProtocolError> {
    let dest = send.begin_write(bytes.len())?;
    dest[..bytes.len()].copy_from_slice(bytes);
    send.confirm_write(bytes.len());
    Ok(())
}

fn write_uint(send: &mut IoBuffer, value: u64) -> Result<(), ProtocolError> {
    let mut digits = itoa::Buffer::new();
    write_bytes(send, digits.format(value).as_bytes())
}

fn write_int(send: &mut IoBuffer, value: i64) -> Result<(), ProtocolError> {
    let mut digits = itoa::Buffer::new();
    write_bytes(send, digits.format(value).as_bytes())
}

fn write_error_line(
    send: &mut IoBuffer,
    prefix: &str,
    err: &ProtocolError,
) -> Result<(), ProtocolError> {
    write_bytes(send, format!("{prefix} {err}\r\n").as_bytes())
}

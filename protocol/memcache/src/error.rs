//! Protocol error taxonomy and recovery classification.

use cache_core::CacheError;
use io_buffer::BufferError;
use thiserror::Error;

/// Everything that can go wrong while handling one command.
///
/// The variant decides both the reply line (`ERROR`, `CLIENT_ERROR …`,
/// `SERVER_ERROR …`, or silence) and what happens to the receive buffer
/// (rollback, full reset, or nothing); see [`ErrorClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// More bytes are needed before the command can be parsed.
    #[error("request is incomplete")]
    IncompleteRequest,
    /// The frame is irrecoverably malformed (unknown command).
    #[error("broken request")]
    BrokenRequest,
    /// Trailing arguments where the line should have ended.
    #[error("after all command arguments CRLF is expected")]
    CrlfExpected,
    /// The value payload was not terminated by CRLF.
    #[error("value must be followed by CRLF")]
    ValueCrlfExpected,
    /// Declared value length exceeds the configured maximum.
    #[error("value length is too big")]
    ValueLength,
    /// A trailing argument that is not the `noreply` token.
    #[error("invalid argument (expected noreply)")]
    NoreplyExpected,
    /// Empty key, key over 250 bytes, or control/space bytes in the key.
    #[error("invalid key")]
    KeyInvalid,
    /// An argument that should be a number is not.
    #[error("bad numeric value")]
    NumericConvert,
    /// A numeric argument does not fit its type.
    #[error("numeric value is out of range")]
    NumericOverflow,
    /// The command (or argument form) is not supported.
    #[error("not implemented")]
    NotImplemented,
    /// The cache ran out of arena memory mid-operation.
    #[error("out of memory")]
    OutOfMemory,
    /// A buffer refused to grow.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// How the recovery boundary reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Rewind the read cursor and wait for more bytes; no output.
    Incomplete,
    /// Discard the receive buffer, reply `ERROR`.
    Broken,
    /// Structurally bad frame: discard the receive buffer, reply
    /// `CLIENT_ERROR <message>`.
    ClientStructural,
    /// Bad number in an otherwise well-framed command: reply
    /// `CLIENT_ERROR <message>` without discarding anything.
    ClientNumeric,
    /// Internal failure: reply `SERVER_ERROR <message>`.
    Server,
}

impl ProtocolError {
    pub(crate) fn class(&self) -> ErrorClass {
        match self {
            Self::IncompleteRequest => ErrorClass::Incomplete,
            Self::BrokenRequest => ErrorClass::Broken,
            Self::CrlfExpected
            | Self::ValueCrlfExpected
            | Self::ValueLength
            | Self::NoreplyExpected
            | Self::KeyInvalid => ErrorClass::ClientStructural,
            Self::NumericConvert | Self::NumericOverflow => ErrorClass::ClientNumeric,
            Self::NotImplemented | Self::OutOfMemory | Self::Buffer(_) => ErrorClass::Server,
        }
    }
}

impl From<CacheError> for ProtocolError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::OutOfMemory => Self::OutOfMemory,
            CacheError::NumericConvert => Self::NumericConvert,
            CacheError::NumericOverflow => Self::NumericOverflow,
        }
    }
}

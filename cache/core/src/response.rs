//! Response tokens and command selectors shared between the cache and the
//! protocol layer.

use std::fmt;

/// Outcome of a cache mutation, spelled exactly as the ASCII protocol
/// serializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
}

impl Response {
    /// The verbatim wire token.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Stored => b"STORED",
            Self::NotStored => b"NOT_STORED",
            Self::Exists => b"EXISTS",
            Self::NotFound => b"NOT_FOUND",
            Self::Deleted => b"DELETED",
            Self::Touched => b"TOUCHED",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap())
    }
}

/// Which storage semantics `store` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCommand {
    /// Unconditional upsert.
    Set,
    /// Store only when the key is absent.
    Add,
    /// Store only when the key is present.
    Replace,
    /// Concatenate after the existing value.
    Append,
    /// Concatenate before the existing value.
    Prepend,
    /// Store only when the supplied version matches.
    Cas,
}

/// Direction of an arithmetic command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticCommand {
    Incr,
    Decr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_tokens_verbatim() {
        assert_eq!(Response::Stored.as_bytes(), b"STORED");
        assert_eq!(Response::NotStored.as_bytes(), b"NOT_STORED");
        assert_eq!(Response::Exists.as_bytes(), b"EXISTS");
        assert_eq!(Response::NotFound.as_bytes(), b"NOT_FOUND");
        assert_eq!(Response::Deleted.as_bytes(), b"DELETED");
        assert_eq!(Response::Touched.as_bytes(), b"TOUCHED");
    }

    #[test]
    fn test_response_display() {
        assert_eq!(Response::Stored.to_string(), "STORED");
        assert_eq!(Response::NotFound.to_string(), "NOT_FOUND");
    }
}

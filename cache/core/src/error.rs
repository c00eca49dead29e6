//! Error types for cache operations.

use std::fmt;

/// Errors that can escape a cache operation.
///
/// Failures that have a memcached response token (key missing, CAS
/// mismatch, …) are reported as [`Response`](crate::Response) values, not
/// errors; this enum covers the cases the protocol must translate into
/// error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The arena could not supply memory, even after eviction.
    OutOfMemory,
    /// The stored value is not a decimal integer (incr/decr).
    NumericConvert,
    /// Arithmetic produced a value outside the 64-bit range.
    NumericOverflow,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NumericConvert => {
                write!(f, "cannot increment or decrement non-numeric value")
            }
            Self::NumericOverflow => write!(f, "numeric value out of range"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", CacheError::OutOfMemory), "out of memory");
        assert_eq!(
            format!("{}", CacheError::NumericConvert),
            "cannot increment or decrement non-numeric value"
        );
        assert_eq!(
            format!("{}", CacheError::NumericOverflow),
            "numeric value out of range"
        );
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<CacheError>();
    }
}

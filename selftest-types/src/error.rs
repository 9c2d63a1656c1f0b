//! Error types for selftest-types.

use thiserror::Error;

/// Errors raised when parsing identifiers and versions from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Identifier was not a non-negative integer.
    #[error("invalid {kind} id: {value:?}")]
    InvalidId {
        /// Which identifier was being parsed ("host", "instance").
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Driver version was not a dotted list of integers.
    #[error("invalid driver version: {0:?}")]
    InvalidVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ParseError::InvalidId {
            kind: "host",
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "invalid host id: \"abc\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ParseError>();
    }
}

//! Redis Serialization Protocol (RESP2) and inline protocol support.
//!
//! The same token encoding is used on the wire, in snapshot files and in the
//! append-only log.

pub mod inline;
pub mod resp;

pub use inline::InlineParser;
pub use resp::{RespParser, RespValue};

/// Malformed protocol input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid RESP type byte: {0:?}")]
    InvalidTypeByte(char),
    #[error("invalid length: {0}")]
    InvalidLength(String),
    #[error("invalid integer: {0}")]
    InvalidInteger(String),
    #[error("bulk string is not terminated by CRLF")]
    MissingTerminator,
    #[error("invalid UTF-8 in protocol line")]
    InvalidUtf8,
    #[error("unbalanced quotes in inline command")]
    UnbalancedQuotes,
}

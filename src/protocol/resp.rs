use bytes::{Buf, Bytes, BytesMut};

use super::{InlineParser, ProtocolError};

/// Upper bound for a single bulk string or array header.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// RESP2 (Redis Serialization Protocol) token.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),          // +
    Error(String),                 // -
    Integer(i64),                  // :
    BulkString(Option<Bytes>),     // $ (None = null bulk)
    Array(Option<Vec<RespValue>>), // * (None = null array)
    /// Several top-level replies written back to back. Produced by commands
    /// that answer once per argument (SUBSCRIBE, UNSUBSCRIBE); never parsed.
    Sequence(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    pub fn integer(value: i64) -> Self {
        RespValue::Integer(value)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Array of bulk strings, the shape of every command invocation.
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(Some(parts.into_iter().map(RespValue::bulk).collect()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Extracts the bulk strings of a command array.
    ///
    /// Returns `None` for anything that is not a non-empty array of
    /// non-null bulk (or simple) strings.
    pub fn into_command_parts(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(Some(items)) if !items.is_empty() => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(data)) => Some(data),
                    RespValue::SimpleString(s) => Some(Bytes::from(s)),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Serialize this value to Redis wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                out.push(b'-');
                out.extend_from_slice(e.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                out.extend_from_slice(format!(":{}\r\n", i).as_bytes());
            }
            RespValue::BulkString(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Sequence(replies) => {
                for reply in replies {
                    reply.write_to(out);
                }
            }
        }
    }
}

/// Stateful parser for Redis protocol messages.
///
/// Accumulates data in a buffer and yields complete values. Incomplete
/// input is left in the buffer untouched until more bytes arrive.
pub struct RespParser {
    buffer: BytesMut,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Parser over an already complete input, such as a log file.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut parser = Self::new();
        parser.add_data(data);
        parser
    }

    /// Add incoming bytes to the parser buffer.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Drop buffered input to recover from a protocol error.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes received but not yet consumed by a complete value.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next complete value. Returns `None` if more data is needed.
    /// Lines that do not start with a RESP type byte are parsed as inline
    /// (telnet-style) commands.
    pub fn parse(&mut self) -> Result<Option<RespValue>, ProtocolError> {
        let Some(&first) = self.buffer.first() else {
            return Ok(None);
        };

        let parsed = if is_resp_type(first) {
            parse_value(&self.buffer)?
        } else {
            InlineParser::parse(&self.buffer)?
        };

        match parsed {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn is_resp_type(byte: u8) -> bool {
    matches!(byte, b'+' | b'-' | b':' | b'$' | b'*')
}

/// Parses one value from the start of `buf`, returning it with the number of
/// bytes it occupies.
fn parse_value(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    let Some(&type_byte) = buf.first() else {
        return Ok(None);
    };
    let Some((line, mut pos)) = read_line(buf, 1)? else {
        return Ok(None);
    };

    match type_byte {
        b'+' => Ok(Some((RespValue::SimpleString(line.to_string()), pos))),
        b'-' => Ok(Some((RespValue::Error(line.to_string()), pos))),
        b':' => {
            let value = line
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidInteger(line.to_string()))?;
            Ok(Some((RespValue::Integer(value), pos)))
        }
        b'$' => {
            let length = parse_length(line)?;
            if length < 0 {
                return Ok(Some((RespValue::BulkString(None), pos)));
            }
            let length = length as usize;
            if buf.len() < pos + length + 2 {
                return Ok(None);
            }
            if &buf[pos + length..pos + length + 2] != b"\r\n" {
                return Err(ProtocolError::MissingTerminator);
            }
            let data = Bytes::copy_from_slice(&buf[pos..pos + length]);
            Ok(Some((RespValue::BulkString(Some(data)), pos + length + 2)))
        }
        b'*' => {
            let length = parse_length(line)?;
            if length < 0 {
                return Ok(Some((RespValue::Array(None), pos)));
            }
            let mut items = Vec::with_capacity((length as usize).min(1024));
            for _ in 0..length {
                match parse_value(&buf[pos..])? {
                    Some((item, used)) => {
                        items.push(item);
                        pos += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), pos)))
        }
        other => Err(ProtocolError::InvalidTypeByte(other as char)),
    }
}

/// Reads a CRLF-terminated line starting at `start`. Returns the line and the
/// position right after the terminator.
fn read_line(buf: &[u8], start: usize) -> Result<Option<(&str, usize)>, ProtocolError> {
    let rest = &buf[start.min(buf.len())..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let line = std::str::from_utf8(&rest[..end]).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Some((line, start + end + 2)))
        }
        None => Ok(None),
    }
}

fn parse_length(line: &str) -> Result<i64, ProtocolError> {
    let length = line
        .parse::<i64>()
        .map_err(|_| ProtocolError::InvalidLength(line.to_string()))?;
    if length < -1 || length > MAX_BULK_LEN {
        return Err(ProtocolError::InvalidLength(line.to_string()));
    }
    Ok(length)
}

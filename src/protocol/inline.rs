//! Inline command parser for Redis protocol.
//!
//! Supports telnet-style space-separated commands like "PING" or "SET key value".

use super::{ProtocolError, RespValue};
use bytes::Bytes;

/// Parser for inline (telnet-style) Redis commands.
///
/// Converts space-separated text commands into RESP Array format.
pub struct InlineParser;

impl InlineParser {
    /// Parse inline command format: "COMMAND arg1 arg2\r\n"
    ///
    /// Returns the command as an array of bulk strings together with the
    /// number of bytes consumed, or `None` if the line is incomplete.
    pub fn parse(buffer: &[u8]) -> Result<Option<(RespValue, usize)>, ProtocolError> {
        let end_pos = match buffer.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buffer[..end_pos]).map_err(|_| ProtocolError::InvalidUtf8)?;
        let parts = Self::parse_command_line(line)?;

        // Blank lines are consumed and answered with nothing.
        let value = if parts.is_empty() {
            RespValue::Array(None)
        } else {
            RespValue::Array(Some(
                parts
                    .into_iter()
                    .map(|s| RespValue::BulkString(Some(Bytes::from(s))))
                    .collect(),
            ))
        };

        Ok(Some((value, end_pos + 2)))
    }

    /// Parse command line handling quoted strings.
    fn parse_command_line(line: &str) -> Result<Vec<String>, ProtocolError> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '"' => in_quotes = !in_quotes,
                ' ' | '\t' if !in_quotes => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                '\\' if in_quotes => match chars.next() {
                    Some('n') => current.push('\n'),
                    Some('r') => current.push('\r'),
                    Some('t') => current.push('\t'),
                    Some('"') => current.push('"'),
                    Some('\\') => current.push('\\'),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(ch),
            }
        }

        if in_quotes {
            return Err(ProtocolError::UnbalancedQuotes);
        }
        if !current.is_empty() {
            parts.push(current);
        }

        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Vec<Bytes> {
        let (value, _) = InlineParser::parse(input).unwrap().unwrap();
        value.into_command_parts().unwrap()
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(parse(b"PING\r\n"), vec![Bytes::from("PING")]);
    }

    #[test]
    fn test_command_with_args() {
        assert_eq!(
            parse(b"SET mykey myvalue\r\n"),
            vec![Bytes::from("SET"), Bytes::from("mykey"), Bytes::from("myvalue")]
        );
    }

    #[test]
    fn test_quoted_argument() {
        let parts = parse(b"SET key \"value with spaces\"\r\n");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], Bytes::from("value with spaces"));
    }

    #[test]
    fn test_escape_sequences() {
        let parts = parse(b"SET key \"line1\\nline2\"\r\n");
        assert_eq!(parts[2], Bytes::from("line1\nline2"));
    }

    #[test]
    fn test_incomplete_command() {
        assert!(InlineParser::parse(b"PING").unwrap().is_none());
    }

    #[test]
    fn test_unclosed_quote() {
        assert!(matches!(
            InlineParser::parse(b"SET key \"unclosed\r\n"),
            Err(ProtocolError::UnbalancedQuotes)
        ));
    }

    #[test]
    fn test_whitespace_runs() {
        assert_eq!(parse(b"SET   key    value\r\n").len(), 3);
        assert_eq!(parse(b"SET\tkey\tvalue\r\n").len(), 3);
    }

    #[test]
    fn test_bytes_consumed() {
        let (_, consumed) = InlineParser::parse(b"SET key val\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(consumed, 13);
    }

    #[test]
    fn test_blank_line() {
        let (value, consumed) = InlineParser::parse(b"\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Array(None));
        assert_eq!(consumed, 2);
    }
}

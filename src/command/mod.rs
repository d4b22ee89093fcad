//! Command contract and registry.
//!
//! Every command is a plain function from the target [`Database`] and a
//! [`Request`] to a reply token. Its metadata (arity, required value type,
//! read-only and pub/sub flags) lives next to it in a [`CommandSpec`] table;
//! [`CommandRegistry`] resolves case-insensitive names to those specs and the
//! dispatch pipeline in [`ServerContext::execute`] enforces the metadata
//! before the function runs.

pub mod bitset;
pub mod hash;
pub mod key;
pub mod list;
pub mod pubsub;
pub mod server;
pub mod set;
pub mod string;
pub mod zset;

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

use crate::protocol::RespValue;
use crate::server::ServerContext;
use crate::session::Session;
use crate::storage::{DataType, Database, StorageError};

/// Command-level failures, rendered to the client as error tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR value is not a valid float")]
    NotFloat,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR bit offset is not an integer or out of range")]
    BitOffset,
    #[error("ERR bit is not an integer or out of range")]
    BitValue,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR index out of range")]
    IndexOutOfRange,
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),
    #[error("ERR only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context")]
    SubscriberMode,
    #[error("ERR Protocol error: expected an array of bulk strings")]
    InvalidRequest,
}

impl CommandError {
    /// Short label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand(_) => "unknown_command",
            CommandError::WrongArity(_) => "wrong_arity",
            CommandError::WrongType => "wrong_type",
            CommandError::NotInteger
            | CommandError::NotFloat
            | CommandError::Overflow
            | CommandError::BitOffset
            | CommandError::BitValue
            | CommandError::InvalidExpire(_) => "invalid_number",
            CommandError::Syntax => "syntax",
            CommandError::NoSuchKey | CommandError::IndexOutOfRange => "invalid_target",
            CommandError::SubscriberMode => "subscriber_mode",
            CommandError::InvalidRequest => "invalid_request",
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WrongType { .. } => CommandError::WrongType,
        }
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}

pub type CommandResult = Result<RespValue, CommandError>;

/// Implementation of one command.
pub type CommandFn = fn(&Database, &Request<'_>) -> CommandResult;

/// Number of parameters a command accepts, not counting its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, params: usize) -> bool {
        match *self {
            Arity::Exact(n) => params == n,
            Arity::AtLeast(n) => params >= n,
        }
    }
}

/// Which parameters name the keys a command touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPositions {
    None,
    First,
    All,
    /// `key value key value ..`
    Pairs,
}

impl KeyPositions {
    pub fn select<'a>(&self, params: &'a [Bytes]) -> Vec<&'a Bytes> {
        match self {
            KeyPositions::None => Vec::new(),
            KeyPositions::First => params.first().into_iter().collect(),
            KeyPositions::All => params.iter().collect(),
            KeyPositions::Pairs => params.iter().step_by(2).collect(),
        }
    }
}

/// Declarative metadata plus the implementation of a command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: Arity,
    /// Variant the first parameter's key must hold, when it exists.
    pub required_type: Option<DataType>,
    /// Never logged to the append-only file.
    pub read_only: bool,
    /// Accepted while the session is in subscriber mode.
    pub pubsub_allowed: bool,
    /// Keys reported in keyspace notifications.
    pub keys: KeyPositions,
    handler: CommandFn,
}

impl CommandSpec {
    pub const fn new(name: &'static str, arity: Arity, handler: CommandFn) -> Self {
        Self {
            name,
            arity,
            required_type: None,
            read_only: false,
            pubsub_allowed: false,
            keys: KeyPositions::First,
            handler,
        }
    }

    pub const fn read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }

    pub const fn typed(self, data_type: DataType) -> Self {
        Self {
            required_type: Some(data_type),
            ..self
        }
    }

    pub const fn pubsub(self) -> Self {
        Self {
            pubsub_allowed: true,
            ..self
        }
    }

    pub const fn keys(self, keys: KeyPositions) -> Self {
        Self { keys, ..self }
    }

    pub fn execute(&self, db: &Database, request: &Request<'_>) -> CommandResult {
        (self.handler)(db, request)
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("required_type", &self.required_type)
            .field("read_only", &self.read_only)
            .field("pubsub_allowed", &self.pubsub_allowed)
            .field("keys", &self.keys)
            .finish()
    }
}

/// A resolved invocation handed to a command implementation.
pub struct Request<'a> {
    name: &'static str,
    params: &'a [Bytes],
    server: &'a ServerContext,
    session: &'a Session,
}

impl<'a> Request<'a> {
    pub fn new(
        name: &'static str,
        params: &'a [Bytes],
        server: &'a ServerContext,
        session: &'a Session,
    ) -> Self {
        Self {
            name,
            params,
            server,
            session,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &'a [Bytes] {
        self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Mandatory parameter. Arity is validated before execution, so a
    /// missing one only happens with a misdeclared spec.
    pub fn param(&self, index: usize) -> Result<&'a Bytes, CommandError> {
        self.params
            .get(index)
            .ok_or_else(|| CommandError::WrongArity(self.name.to_string()))
    }

    pub fn optional_param(&self, index: usize) -> Option<&'a Bytes> {
        self.params.get(index)
    }

    pub fn server(&self) -> &'a ServerContext {
        self.server
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }
}

/// Maps lowercase command names to their specs.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// Registry with every built-in command.
    pub fn new() -> Self {
        let mut registry = Self::default();
        for table in [
            key::COMMANDS,
            string::COMMANDS,
            list::COMMANDS,
            set::COMMANDS,
            hash::COMMANDS,
            zset::COMMANDS,
            bitset::COMMANDS,
            server::COMMANDS,
            pubsub::COMMANDS,
        ] {
            for spec in table {
                registry.register(*spec);
            }
        }
        registry
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, name: &[u8]) -> Option<&CommandSpec> {
        let name = std::str::from_utf8(name).ok()?;
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.commands.get(name.to_ascii_lowercase().as_str())
        } else {
            self.commands.get(name)
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }
}

pub(crate) fn parse_i64(data: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotInteger)
}

pub(crate) fn parse_f64(data: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(data).map_err(|_| CommandError::NotFloat)?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| CommandError::NotFloat)?,
    };
    if value.is_nan() {
        return Err(CommandError::NotFloat);
    }
    Ok(value)
}

/// Formats a score the way replies render floats: `1.0`, `2.5`, `inf`.
pub(crate) fn format_f64(value: f64) -> String {
    if value.is_infinite() {
        (if value > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e17 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Resolves Redis-style inclusive `start..=stop` indexes (negative counts
/// from the end) against a collection of `len` items.
pub(crate) fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Wraps `items` as an array of bulk strings.
pub(crate) fn bulk_array<'b, I>(items: I) -> RespValue
where
    I: IntoIterator<Item = &'b Bytes>,
{
    RespValue::array(items.into_iter().cloned().map(RespValue::bulk).collect())
}

/// Replies with a single token when there is one, else with all of them
/// back to back.
pub(crate) fn replies(mut items: Vec<RespValue>) -> RespValue {
    if items.len() == 1 {
        items.remove(0)
    } else {
        RespValue::Sequence(items)
    }
}

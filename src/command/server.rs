//! Connection and server-level commands.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{Arity, CommandError, CommandResult, CommandSpec, KeyPositions, Request};
use crate::protocol::RespValue;
use crate::storage::Database;

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("ping", Arity::AtLeast(0), ping).read_only().pubsub(),
    CommandSpec::new("echo", Arity::Exact(1), echo).read_only(),
    CommandSpec::new("dbsize", Arity::Exact(0), dbsize).read_only(),
    CommandSpec::new("flushdb", Arity::Exact(0), flushdb).keys(KeyPositions::None),
    CommandSpec::new("time", Arity::Exact(0), time).read_only(),
];

fn ping(_db: &Database, request: &Request<'_>) -> CommandResult {
    match request.params() {
        [] => Ok(RespValue::simple("PONG")),
        [message] => Ok(RespValue::bulk(message.clone())),
        _ => Err(CommandError::WrongArity(request.name().to_string())),
    }
}

fn echo(_db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(RespValue::bulk(request.param(0)?.clone()))
}

fn dbsize(db: &Database, _request: &Request<'_>) -> CommandResult {
    Ok(RespValue::integer(db.len() as i64))
}

fn flushdb(db: &Database, _request: &Request<'_>) -> CommandResult {
    db.clear();
    tracing::info!("database flushed");
    Ok(RespValue::ok())
}

/// Unix time as `[seconds, microseconds]`.
fn time(_db: &Database, _request: &Request<'_>) -> CommandResult {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(RespValue::array(vec![
        RespValue::bulk(now.as_secs().to_string()),
        RespValue::bulk(now.subsec_micros().to_string()),
    ]))
}

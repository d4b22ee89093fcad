//! LIST commands.

use bytes::Bytes;

use super::{bulk_array, parse_i64, resolve_range, Arity, CommandError, CommandResult, CommandSpec, Request};
use crate::protocol::RespValue;
use crate::storage::{DataType, Database, DatabaseValue};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("lpush", Arity::AtLeast(2), lpush).typed(DataType::List),
    CommandSpec::new("rpush", Arity::AtLeast(2), rpush).typed(DataType::List),
    CommandSpec::new("lpop", Arity::Exact(1), lpop).typed(DataType::List),
    CommandSpec::new("rpop", Arity::Exact(1), rpop).typed(DataType::List),
    CommandSpec::new("llen", Arity::Exact(1), llen).read_only().typed(DataType::List),
    CommandSpec::new("lindex", Arity::Exact(2), lindex).read_only().typed(DataType::List),
    CommandSpec::new("lrange", Arity::Exact(3), lrange).read_only().typed(DataType::List),
    CommandSpec::new("lset", Arity::Exact(3), lset).typed(DataType::List),
];

#[derive(Clone, Copy)]
enum End {
    Head,
    Tail,
}

fn lpush(db: &Database, request: &Request<'_>) -> CommandResult {
    push(db, request, End::Head)
}

fn rpush(db: &Database, request: &Request<'_>) -> CommandResult {
    push(db, request, End::Tail)
}

/// Pushes every value in argument order, so `LPUSH k a b c` leaves
/// `c b a` at the head.
fn push(db: &Database, request: &Request<'_>, end: End) -> CommandResult {
    let values = &request.params()[1..];
    let merged = db.merge(request.param(0)?, DataType::List.empty(), |current, _| {
        let mut list = current.as_list()?.clone();
        for value in values {
            match end {
                End::Head => list.push_front(value.clone()),
                End::Tail => list.push_back(value.clone()),
            }
        }
        Ok::<_, CommandError>(DatabaseValue::List(list))
    })?;
    Ok(RespValue::integer(merged.size() as i64))
}

fn lpop(db: &Database, request: &Request<'_>) -> CommandResult {
    pop(db, request.param(0)?, End::Head)
}

fn rpop(db: &Database, request: &Request<'_>) -> CommandResult {
    pop(db, request.param(0)?, End::Tail)
}

fn pop(db: &Database, key: &Bytes, end: End) -> CommandResult {
    if !db.contains(key) {
        return Ok(RespValue::null());
    }
    let mut popped = None;
    db.merge(key, DataType::List.empty(), |current, _| {
        let mut list = current.as_list()?.clone();
        popped = match end {
            End::Head => list.pop_front(),
            End::Tail => list.pop_back(),
        };
        Ok::<_, CommandError>(DatabaseValue::List(list))
    })?;
    db.remove_if(key, DatabaseValue::is_empty);
    Ok(popped.map(RespValue::bulk).unwrap_or_else(RespValue::null))
}

fn llen(db: &Database, request: &Request<'_>) -> CommandResult {
    let len = match db.get(request.param(0)?) {
        Some(value) => value.as_list()?.len(),
        None => 0,
    };
    Ok(RespValue::integer(len as i64))
}

/// Maps a possibly negative index onto `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&index).then_some(index as usize)
}

fn lindex(db: &Database, request: &Request<'_>) -> CommandResult {
    let index = parse_i64(request.param(1)?)?;
    let Some(value) = db.get(request.param(0)?) else {
        return Ok(RespValue::null());
    };
    let list = value.as_list()?;
    Ok(resolve_index(index, list.len())
        .and_then(|i| list.get(i))
        .map(|item| RespValue::bulk(item.clone()))
        .unwrap_or_else(RespValue::null))
}

fn lrange(db: &Database, request: &Request<'_>) -> CommandResult {
    let start = parse_i64(request.param(1)?)?;
    let stop = parse_i64(request.param(2)?)?;
    let Some(value) = db.get(request.param(0)?) else {
        return Ok(RespValue::array(Vec::new()));
    };
    let list = value.as_list()?;
    Ok(match resolve_range(start, stop, list.len()) {
        Some((from, to)) => bulk_array(list.range(from..=to)),
        None => RespValue::array(Vec::new()),
    })
}

fn lset(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    let index = parse_i64(request.param(1)?)?;
    let value = request.param(2)?;
    if !db.contains(key) {
        return Err(CommandError::NoSuchKey);
    }
    db.merge(key, DataType::List.empty(), |current, _| {
        let mut list = current.as_list()?.clone();
        let slot = resolve_index(index, list.len())
            .and_then(|i| list.get_mut(i))
            .ok_or(CommandError::IndexOutOfRange)?;
        *slot = value.clone();
        Ok::<_, CommandError>(DatabaseValue::List(list))
    })?;
    Ok(RespValue::ok())
}

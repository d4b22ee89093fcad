//! SET commands.

use bytes::Bytes;
use std::collections::HashSet;

use super::{bulk_array, Arity, CommandError, CommandResult, CommandSpec, Request};
use crate::protocol::RespValue;
use crate::storage::{DataType, Database, DatabaseValue};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("sadd", Arity::AtLeast(2), sadd).typed(DataType::Set),
    CommandSpec::new("srem", Arity::AtLeast(2), srem).typed(DataType::Set),
    CommandSpec::new("scard", Arity::Exact(1), scard).read_only().typed(DataType::Set),
    CommandSpec::new("smembers", Arity::Exact(1), smembers).read_only().typed(DataType::Set),
    CommandSpec::new("sismember", Arity::Exact(2), sismember).read_only().typed(DataType::Set),
    CommandSpec::new("sunion", Arity::AtLeast(1), sunion).read_only().typed(DataType::Set),
    CommandSpec::new("sinter", Arity::AtLeast(1), sinter).read_only().typed(DataType::Set),
    CommandSpec::new("sdiff", Arity::AtLeast(1), sdiff).read_only().typed(DataType::Set),
];

fn sadd(db: &Database, request: &Request<'_>) -> CommandResult {
    let members = &request.params()[1..];
    let mut added = 0;
    db.merge(request.param(0)?, DataType::Set.empty(), |current, _| {
        let mut set = current.as_set()?.clone();
        added = members.iter().filter(|m| set.insert((*m).clone())).count();
        Ok::<_, CommandError>(DatabaseValue::Set(set))
    })?;
    Ok(RespValue::integer(added as i64))
}

fn srem(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    if !db.contains(key) {
        return Ok(RespValue::integer(0));
    }
    let members = &request.params()[1..];
    let mut removed = 0;
    db.merge(key, DataType::Set.empty(), |current, _| {
        let mut set = current.as_set()?.clone();
        removed = members.iter().filter(|m| set.remove(*m)).count();
        Ok::<_, CommandError>(DatabaseValue::Set(set))
    })?;
    db.remove_if(key, DatabaseValue::is_empty);
    Ok(RespValue::integer(removed as i64))
}

/// The set stored at `key`, empty when absent.
fn load(db: &Database, key: &[u8]) -> Result<HashSet<Bytes>, CommandError> {
    match db.get(key) {
        Some(DatabaseValue::Set(set)) => Ok(set),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(HashSet::new()),
    }
}

fn scard(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(RespValue::integer(load(db, request.param(0)?)?.len() as i64))
}

fn smembers(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(bulk_array(&load(db, request.param(0)?)?))
}

fn sismember(db: &Database, request: &Request<'_>) -> CommandResult {
    let set = load(db, request.param(0)?)?;
    Ok(RespValue::integer(set.contains(request.param(1)?) as i64))
}

fn sunion(db: &Database, request: &Request<'_>) -> CommandResult {
    let mut result = HashSet::new();
    for key in request.params() {
        result.extend(load(db, key)?);
    }
    Ok(bulk_array(&result))
}

fn sinter(db: &Database, request: &Request<'_>) -> CommandResult {
    let (first, rest) = request.params().split_first().ok_or(CommandError::Syntax)?;
    let mut result = load(db, first)?;
    for key in rest {
        let other = load(db, key)?;
        result.retain(|member| other.contains(member));
    }
    Ok(bulk_array(&result))
}

fn sdiff(db: &Database, request: &Request<'_>) -> CommandResult {
    let (first, rest) = request.params().split_first().ok_or(CommandError::Syntax)?;
    let mut result = load(db, first)?;
    for key in rest {
        let other = load(db, key)?;
        result.retain(|member| !other.contains(member));
    }
    Ok(bulk_array(&result))
}

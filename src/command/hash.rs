//! HASH commands.

use bytes::Bytes;
use std::collections::HashMap;

use super::{bulk_array, Arity, CommandError, CommandResult, CommandSpec, Request};
use crate::protocol::RespValue;
use crate::storage::{DataType, Database, DatabaseValue};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("hset", Arity::AtLeast(3), hset).typed(DataType::Hash),
    CommandSpec::new("hget", Arity::Exact(2), hget).read_only().typed(DataType::Hash),
    CommandSpec::new("hdel", Arity::AtLeast(2), hdel).typed(DataType::Hash),
    CommandSpec::new("hexists", Arity::Exact(2), hexists).read_only().typed(DataType::Hash),
    CommandSpec::new("hgetall", Arity::Exact(1), hgetall).read_only().typed(DataType::Hash),
    CommandSpec::new("hkeys", Arity::Exact(1), hkeys).read_only().typed(DataType::Hash),
    CommandSpec::new("hvals", Arity::Exact(1), hvals).read_only().typed(DataType::Hash),
    CommandSpec::new("hlen", Arity::Exact(1), hlen).read_only().typed(DataType::Hash),
];

/// HSET key field value [field value ...]
fn hset(db: &Database, request: &Request<'_>) -> CommandResult {
    let pairs = &request.params()[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity(request.name().to_string()));
    }
    let mut added = 0;
    db.merge(request.param(0)?, DataType::Hash.empty(), |current, _| {
        let mut hash = current.as_hash()?.clone();
        for pair in pairs.chunks_exact(2) {
            if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        Ok::<_, CommandError>(DatabaseValue::Hash(hash))
    })?;
    Ok(RespValue::integer(added))
}

fn hdel(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    if !db.contains(key) {
        return Ok(RespValue::integer(0));
    }
    let fields = &request.params()[1..];
    let mut removed = 0;
    db.merge(key, DataType::Hash.empty(), |current, _| {
        let mut hash = current.as_hash()?.clone();
        removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
        Ok::<_, CommandError>(DatabaseValue::Hash(hash))
    })?;
    db.remove_if(key, DatabaseValue::is_empty);
    Ok(RespValue::integer(removed as i64))
}

/// The hash stored at `key`, empty when absent.
fn load(db: &Database, key: &[u8]) -> Result<HashMap<Bytes, Bytes>, CommandError> {
    match db.get(key) {
        Some(value) => Ok(value.as_hash()?.clone()),
        None => Ok(HashMap::new()),
    }
}

fn hget(db: &Database, request: &Request<'_>) -> CommandResult {
    let hash = load(db, request.param(0)?)?;
    Ok(hash
        .get(request.param(1)?)
        .map(|value| RespValue::bulk(value.clone()))
        .unwrap_or_else(RespValue::null))
}

fn hexists(db: &Database, request: &Request<'_>) -> CommandResult {
    let hash = load(db, request.param(0)?)?;
    Ok(RespValue::integer(hash.contains_key(request.param(1)?) as i64))
}

fn hgetall(db: &Database, request: &Request<'_>) -> CommandResult {
    let hash = load(db, request.param(0)?)?;
    Ok(bulk_array(hash.iter().flat_map(|(field, value)| [field, value])))
}

fn hkeys(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(bulk_array(load(db, request.param(0)?)?.keys()))
}

fn hvals(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(bulk_array(load(db, request.param(0)?)?.values()))
}

fn hlen(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(RespValue::integer(load(db, request.param(0)?)?.len() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::{sorted, Harness};

    #[test]
    fn test_hset_hget() {
        let h = Harness::new();
        assert_eq!(h.run(&["HSET", "h", "f1", "v1", "f2", "v2"]), RespValue::integer(2));
        assert_eq!(h.run(&["HSET", "h", "f1", "new"]), RespValue::integer(0));
        assert_eq!(h.run(&["HGET", "h", "f1"]), RespValue::bulk("new"));
        assert_eq!(h.run(&["HGET", "h", "nope"]), RespValue::null());
        assert_eq!(h.run(&["HGET", "missing", "f1"]), RespValue::null());
        assert_eq!(
            h.run(&["HSET", "h", "f1", "v1", "f2"]),
            CommandError::WrongArity("hset".to_string()).into()
        );
    }

    #[test]
    fn test_hash_views() {
        let h = Harness::new();
        h.run(&["HSET", "h", "a", "1", "b", "2"]);
        assert_eq!(h.run(&["HLEN", "h"]), RespValue::integer(2));
        assert_eq!(h.run(&["HEXISTS", "h", "a"]), RespValue::integer(1));
        assert_eq!(h.run(&["HEXISTS", "h", "z"]), RespValue::integer(0));
        assert_eq!(sorted(h.run(&["HKEYS", "h"])), vec!["a", "b"]);
        assert_eq!(sorted(h.run(&["HVALS", "h"])), vec!["1", "2"]);
        assert_eq!(sorted(h.run(&["HGETALL", "h"])), vec!["1", "2", "a", "b"]);
        assert_eq!(sorted(h.run(&["HGETALL", "missing"])), Vec::<String>::new());
    }

    #[test]
    fn test_hdel_removes_empty_hash() {
        let h = Harness::new();
        h.run(&["HSET", "h", "a", "1", "b", "2"]);
        assert_eq!(h.run(&["HDEL", "h", "a", "zz"]), RespValue::integer(1));
        assert_eq!(h.run(&["HDEL", "h", "b"]), RespValue::integer(1));
        assert_eq!(h.run(&["TYPE", "h"]), RespValue::simple("none"));
        assert_eq!(h.run(&["HDEL", "h", "b"]), RespValue::integer(0));
    }
}

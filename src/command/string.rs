//! STRING commands.

use bytes::{Bytes, BytesMut};
use std::time::{Duration, SystemTime};

use super::{parse_i64, Arity, CommandError, CommandResult, CommandSpec, KeyPositions, Request};
use crate::protocol::RespValue;
use crate::storage::key::to_unix_millis;
use crate::storage::{DataType, Database, DatabaseKey, DatabaseValue};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("get", Arity::Exact(1), get).read_only().typed(DataType::String),
    CommandSpec::new("set", Arity::AtLeast(2), set),
    CommandSpec::new("setex", Arity::Exact(3), setex),
    CommandSpec::new("setnx", Arity::Exact(2), setnx),
    CommandSpec::new("getset", Arity::Exact(2), getset).typed(DataType::String),
    CommandSpec::new("mget", Arity::AtLeast(1), mget).read_only(),
    CommandSpec::new("mset", Arity::AtLeast(2), mset).keys(KeyPositions::Pairs),
    CommandSpec::new("incr", Arity::Exact(1), incr).typed(DataType::String),
    CommandSpec::new("decr", Arity::Exact(1), decr).typed(DataType::String),
    CommandSpec::new("incrby", Arity::Exact(2), incrby).typed(DataType::String),
    CommandSpec::new("decrby", Arity::Exact(2), decrby).typed(DataType::String),
    CommandSpec::new("append", Arity::Exact(2), append).typed(DataType::String),
    CommandSpec::new("strlen", Arity::Exact(1), strlen).read_only().typed(DataType::String),
];

fn get(db: &Database, request: &Request<'_>) -> CommandResult {
    match db.get(request.param(0)?) {
        Some(value) => Ok(RespValue::bulk(value.as_string()?.clone())),
        None => Ok(RespValue::null()),
    }
}

/// SET key value [EX seconds | PX milliseconds] [NX]
fn set(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    let value = request.param(1)?;

    let mut ttl = None;
    let mut only_if_absent = false;
    let mut i = 2;
    while let Some(option) = request.optional_param(i) {
        match option.to_ascii_uppercase().as_slice() {
            b"EX" | b"PX" if ttl.is_none() => {
                let amount = parse_i64(request.optional_param(i + 1).ok_or(CommandError::Syntax)?)?;
                let millis = if option.eq_ignore_ascii_case(b"EX") {
                    amount.checked_mul(1000)
                } else {
                    Some(amount)
                };
                ttl = Some(millis.ok_or_else(|| CommandError::InvalidExpire("set".to_string()))?);
                i += 2;
            }
            b"NX" if !only_if_absent => {
                only_if_absent = true;
                i += 1;
            }
            _ => return Err(CommandError::Syntax),
        }
    }

    let key = match ttl {
        Some(millis) => expiring_key(key, millis, "set")?,
        None => DatabaseKey::new(key.clone()),
    };
    let value = DatabaseValue::String(value.clone());
    if only_if_absent {
        if db.put_if_absent(key, value) {
            Ok(RespValue::ok())
        } else {
            Ok(RespValue::null())
        }
    } else {
        db.put(key, value);
        Ok(RespValue::ok())
    }
}

fn setex(db: &Database, request: &Request<'_>) -> CommandResult {
    let millis = parse_i64(request.param(1)?)?
        .checked_mul(1000)
        .ok_or_else(|| CommandError::InvalidExpire("setex".to_string()))?;
    db.put(
        expiring_key(request.param(0)?, millis, "setex")?,
        DatabaseValue::String(request.param(2)?.clone()),
    );
    Ok(RespValue::ok())
}

/// Key expiring `millis` from now. The deadline must be in the future and
/// fit in epoch milliseconds.
fn expiring_key(key: &Bytes, millis: i64, command: &str) -> Result<DatabaseKey, CommandError> {
    let invalid = || CommandError::InvalidExpire(command.to_string());
    if millis <= 0 {
        return Err(invalid());
    }
    to_unix_millis(SystemTime::now())
        .checked_add(millis)
        .ok_or_else(invalid)?;
    DatabaseKey::expiring_in(key.clone(), Duration::from_millis(millis as u64)).ok_or_else(invalid)
}

fn setnx(db: &Database, request: &Request<'_>) -> CommandResult {
    let stored = db.put_if_absent(
        DatabaseKey::new(request.param(0)?.clone()),
        DatabaseValue::String(request.param(1)?.clone()),
    );
    Ok(RespValue::integer(stored as i64))
}

fn getset(db: &Database, request: &Request<'_>) -> CommandResult {
    let previous = db.replace(
        DatabaseKey::new(request.param(0)?.clone()),
        DatabaseValue::String(request.param(1)?.clone()),
    );
    match previous {
        Some(DatabaseValue::String(old)) => Ok(RespValue::bulk(old)),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(RespValue::null()),
    }
}

fn mget(db: &Database, request: &Request<'_>) -> CommandResult {
    let values = request
        .params()
        .iter()
        .map(|key| match db.get(key) {
            Some(DatabaseValue::String(value)) => RespValue::bulk(value),
            _ => RespValue::null(),
        })
        .collect();
    Ok(RespValue::array(values))
}

fn mset(db: &Database, request: &Request<'_>) -> CommandResult {
    let params = request.params();
    if params.len() % 2 != 0 {
        return Err(CommandError::WrongArity(request.name().to_string()));
    }
    for pair in params.chunks_exact(2) {
        db.put(DatabaseKey::new(pair[0].clone()), DatabaseValue::String(pair[1].clone()));
    }
    Ok(RespValue::ok())
}

fn incr(db: &Database, request: &Request<'_>) -> CommandResult {
    increment(db, request.param(0)?, 1)
}

fn decr(db: &Database, request: &Request<'_>) -> CommandResult {
    increment(db, request.param(0)?, -1)
}

fn incrby(db: &Database, request: &Request<'_>) -> CommandResult {
    let delta = parse_i64(request.param(1)?)?;
    increment(db, request.param(0)?, delta)
}

fn decrby(db: &Database, request: &Request<'_>) -> CommandResult {
    let delta = parse_i64(request.param(1)?)?
        .checked_neg()
        .ok_or(CommandError::Overflow)?;
    increment(db, request.param(0)?, delta)
}

/// Atomically adds `delta` to the integer stored at `key` (0 when absent).
fn increment(db: &Database, key: &[u8], delta: i64) -> CommandResult {
    let mut result = 0;
    db.merge(key, DatabaseValue::string("0"), |current, _| {
        let value = parse_i64(current.as_string()?)?;
        result = value.checked_add(delta).ok_or(CommandError::Overflow)?;
        Ok::<_, CommandError>(DatabaseValue::string(result.to_string()))
    })?;
    Ok(RespValue::integer(result))
}

fn append(db: &Database, request: &Request<'_>) -> CommandResult {
    let suffix = request.param(1)?;
    let merged = db.merge(request.param(0)?, DataType::String.empty(), |current, _| {
        let current = current.as_string()?;
        let mut joined = BytesMut::with_capacity(current.len() + suffix.len());
        joined.extend_from_slice(current);
        joined.extend_from_slice(suffix);
        Ok::<_, CommandError>(DatabaseValue::String(joined.freeze()))
    })?;
    Ok(RespValue::integer(merged.size() as i64))
}

fn strlen(db: &Database, request: &Request<'_>) -> CommandResult {
    let len = match db.get(request.param(0)?) {
        Some(value) => value.as_string().map(Bytes::len)?,
        None => 0,
    };
    Ok(RespValue::integer(len as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::{bulks, Harness};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_get() {
        let h = Harness::new();
        assert_eq!(h.run(&["SET", "a", "1"]), RespValue::ok());
        assert_eq!(h.run(&["GET", "a"]), RespValue::bulk("1"));
        assert_eq!(h.run(&["GET", "missing"]), RespValue::null());
    }

    #[test]
    fn test_set_options() {
        let h = Harness::new();
        assert_eq!(h.run(&["SET", "a", "1", "EX", "100"]), RespValue::ok());
        assert_eq!(h.run(&["TTL", "a"]), RespValue::integer(100));

        assert_eq!(h.run(&["SET", "a", "2", "NX"]), RespValue::null());
        assert_eq!(h.run(&["SET", "b", "2", "px", "5000", "nx"]), RespValue::ok());
        assert_eq!(h.run(&["TTL", "b"]), RespValue::integer(5));

        // A plain SET clears the expiration.
        h.run(&["SET", "a", "3"]);
        assert_eq!(h.run(&["TTL", "a"]), RespValue::integer(-1));

        assert_eq!(h.run(&["SET", "a", "1", "EX"]), CommandError::Syntax.into());
        assert_eq!(h.run(&["SET", "a", "1", "KEEP"]), CommandError::Syntax.into());
        assert_eq!(
            h.run(&["SET", "a", "1", "EX", "0"]),
            CommandError::InvalidExpire("set".to_string()).into()
        );
    }

    #[test]
    fn test_huge_expiry_is_rejected() {
        let h = Harness::new();
        let max = i64::MAX.to_string();
        assert_eq!(
            h.run(&["SET", "k", "v", "EX", &max]),
            CommandError::InvalidExpire("set".to_string()).into()
        );
        assert_eq!(
            h.run(&["SET", "k", "v", "PX", &max]),
            CommandError::InvalidExpire("set".to_string()).into()
        );
        assert_eq!(
            h.run(&["SETEX", "k", &max, "v"]),
            CommandError::InvalidExpire("setex".to_string()).into()
        );
        assert_eq!(
            h.run(&["SETEX", "k", "-5", "v"]),
            CommandError::InvalidExpire("setex".to_string()).into()
        );
        assert!(h.db().is_empty());

        assert_eq!(h.run(&["SETEX", "k", "10", "v"]), RespValue::ok());
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(10));
    }

    #[test]
    fn test_set_overwrites_any_type() {
        let h = Harness::new();
        h.run(&["RPUSH", "l", "x"]);
        assert_eq!(h.run(&["SET", "l", "v"]), RespValue::ok());
        assert_eq!(h.run(&["GET", "l"]), RespValue::bulk("v"));
    }

    #[test]
    fn test_setex_and_setnx() {
        let h = Harness::new();
        assert_eq!(h.run(&["SETEX", "k", "10", "v"]), RespValue::ok());
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(10));
        assert!(h.run(&["SETEX", "k", "0", "v"]).is_error());

        assert_eq!(h.run(&["SETNX", "k", "other"]), RespValue::integer(0));
        assert_eq!(h.run(&["SETNX", "n", "first"]), RespValue::integer(1));
        assert_eq!(h.run(&["GET", "n"]), RespValue::bulk("first"));
    }

    #[test]
    fn test_getset() {
        let h = Harness::new();
        assert_eq!(h.run(&["GETSET", "k", "a"]), RespValue::null());
        assert_eq!(h.run(&["GETSET", "k", "b"]), RespValue::bulk("a"));
        assert_eq!(h.run(&["GET", "k"]), RespValue::bulk("b"));
    }

    #[test]
    fn test_mget_mset() {
        let h = Harness::new();
        assert_eq!(h.run(&["MSET", "a", "1", "b", "2"]), RespValue::ok());
        h.run(&["RPUSH", "l", "x"]);

        assert_eq!(
            h.run(&["MGET", "a", "l", "missing", "b"]),
            RespValue::array(vec![
                RespValue::bulk("1"),
                RespValue::null(),
                RespValue::null(),
                RespValue::bulk("2"),
            ])
        );
        assert_eq!(
            h.run(&["MSET", "a", "1", "b"]),
            CommandError::WrongArity("mset".to_string()).into()
        );
    }

    #[test]
    fn test_incr_family() {
        let h = Harness::new();
        assert_eq!(h.run(&["INCR", "n"]), RespValue::integer(1));
        assert_eq!(h.run(&["INCRBY", "n", "10"]), RespValue::integer(11));
        assert_eq!(h.run(&["DECR", "n"]), RespValue::integer(10));
        assert_eq!(h.run(&["DECRBY", "n", "15"]), RespValue::integer(-5));
        assert_eq!(h.run(&["GET", "n"]), RespValue::bulk("-5"));
    }

    #[test]
    fn test_incr_errors_leave_value_untouched() {
        let h = Harness::new();
        h.run(&["SET", "s", "abc"]);
        assert_eq!(h.run(&["INCR", "s"]), CommandError::NotInteger.into());
        assert_eq!(h.run(&["GET", "s"]), RespValue::bulk("abc"));

        h.run(&["SET", "max", &i64::MAX.to_string()]);
        assert_eq!(h.run(&["INCR", "max"]), CommandError::Overflow.into());

        assert_eq!(h.run(&["INCRBY", "n", "x"]), CommandError::NotInteger.into());
        assert_eq!(h.run(&["EXISTS", "n"]), RespValue::integer(0));

        h.run(&["RPUSH", "l", "x"]);
        assert_eq!(h.run(&["INCR", "l"]), CommandError::WrongType.into());
    }

    #[test]
    fn test_incr_keeps_expiration() {
        let h = Harness::new();
        h.run(&["SET", "n", "1", "EX", "100"]);
        h.run(&["INCR", "n"]);
        assert_eq!(h.run(&["TTL", "n"]), RespValue::integer(100));
    }

    #[test]
    fn test_concurrent_incr() {
        let h = Arc::new(Harness::new());
        h.run(&["SET", "counter", "10"]);

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let h = Arc::clone(&h);
                thread::spawn(move || h.run(&["INCR", "counter"]))
            })
            .collect();
        for worker in workers {
            assert!(!worker.join().unwrap().is_error());
        }
        assert_eq!(h.run(&["GET", "counter"]), RespValue::bulk("12"));
    }

    #[test]
    fn test_append_and_strlen() {
        let h = Harness::new();
        assert_eq!(h.run(&["APPEND", "s", "Hello"]), RespValue::integer(5));
        assert_eq!(h.run(&["APPEND", "s", " World"]), RespValue::integer(11));
        assert_eq!(h.run(&["GET", "s"]), RespValue::bulk("Hello World"));
        assert_eq!(h.run(&["STRLEN", "s"]), RespValue::integer(11));
        assert_eq!(h.run(&["STRLEN", "missing"]), RespValue::integer(0));
        assert_eq!(h.run(&["MGET", "s"]), bulks(&["Hello World"]));
    }
}

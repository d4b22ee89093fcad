//! Sorted set commands.

use bytes::Bytes;

use super::{format_f64, parse_f64, parse_i64, resolve_range, Arity, CommandError, CommandResult, CommandSpec, Request};
use crate::protocol::RespValue;
use crate::storage::{DataType, Database, DatabaseValue, SortedSet};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("zadd", Arity::AtLeast(3), zadd).typed(DataType::ZSet),
    CommandSpec::new("zrem", Arity::AtLeast(2), zrem).typed(DataType::ZSet),
    CommandSpec::new("zcard", Arity::Exact(1), zcard).read_only().typed(DataType::ZSet),
    CommandSpec::new("zscore", Arity::Exact(2), zscore).read_only().typed(DataType::ZSet),
    CommandSpec::new("zincrby", Arity::Exact(3), zincrby).typed(DataType::ZSet),
    CommandSpec::new("zrange", Arity::AtLeast(3), zrange).read_only().typed(DataType::ZSet),
    CommandSpec::new("zrevrange", Arity::AtLeast(3), zrevrange).read_only().typed(DataType::ZSet),
];

/// ZADD key score member [score member ...]
fn zadd(db: &Database, request: &Request<'_>) -> CommandResult {
    let pairs = &request.params()[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    let entries = pairs
        .chunks_exact(2)
        .map(|pair| Ok((parse_f64(&pair[0])?, pair[1].clone())))
        .collect::<Result<Vec<(f64, Bytes)>, CommandError>>()?;

    let mut added = 0;
    db.merge(request.param(0)?, DataType::ZSet.empty(), |current, _| {
        let mut zset = current.as_zset()?.clone();
        for (score, member) in entries {
            if zset.insert(member, score) {
                added += 1;
            }
        }
        Ok::<_, CommandError>(DatabaseValue::ZSet(zset))
    })?;
    Ok(RespValue::integer(added))
}

fn zrem(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    if !db.contains(key) {
        return Ok(RespValue::integer(0));
    }
    let members = &request.params()[1..];
    let mut removed = 0;
    db.merge(key, DataType::ZSet.empty(), |current, _| {
        let mut zset = current.as_zset()?.clone();
        removed = members.iter().filter(|m| zset.remove(m)).count();
        Ok::<_, CommandError>(DatabaseValue::ZSet(zset))
    })?;
    db.remove_if(key, DatabaseValue::is_empty);
    Ok(RespValue::integer(removed as i64))
}

/// The sorted set stored at `key`, empty when absent.
fn load(db: &Database, key: &[u8]) -> Result<SortedSet, CommandError> {
    match db.get(key) {
        Some(DatabaseValue::ZSet(zset)) => Ok(zset),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(SortedSet::new()),
    }
}

fn zcard(db: &Database, request: &Request<'_>) -> CommandResult {
    Ok(RespValue::integer(load(db, request.param(0)?)?.len() as i64))
}

fn zscore(db: &Database, request: &Request<'_>) -> CommandResult {
    let zset = load(db, request.param(0)?)?;
    Ok(zset
        .score(request.param(1)?)
        .map(|score| RespValue::bulk(format_f64(score)))
        .unwrap_or_else(RespValue::null))
}

fn zincrby(db: &Database, request: &Request<'_>) -> CommandResult {
    let delta = parse_f64(request.param(1)?)?;
    let member = request.param(2)?;
    let mut score = 0.0;
    db.merge(request.param(0)?, DataType::ZSet.empty(), |current, _| {
        let mut zset = current.as_zset()?.clone();
        let next = zset.score(member).unwrap_or(0.0) + delta;
        if next.is_nan() {
            return Err(CommandError::NotFloat);
        }
        score = zset.increment(member.clone(), delta);
        Ok(DatabaseValue::ZSet(zset))
    })?;
    Ok(RespValue::bulk(format_f64(score)))
}

fn zrange(db: &Database, request: &Request<'_>) -> CommandResult {
    range(db, request, false)
}

fn zrevrange(db: &Database, request: &Request<'_>) -> CommandResult {
    range(db, request, true)
}

/// ZRANGE / ZREVRANGE key start stop [WITHSCORES]
fn range(db: &Database, request: &Request<'_>, reverse: bool) -> CommandResult {
    let start = parse_i64(request.param(1)?)?;
    let stop = parse_i64(request.param(2)?)?;
    let with_scores = match request.params().get(3..) {
        Some([]) | None => false,
        Some([flag]) if flag.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err(CommandError::Syntax),
    };

    let zset = load(db, request.param(0)?)?;
    let Some((from, to)) = resolve_range(start, stop, zset.len()) else {
        return Ok(RespValue::array(Vec::new()));
    };

    let selected: Vec<(&Bytes, f64)> = if reverse {
        zset.iter().rev().skip(from).take(to - from + 1).collect()
    } else {
        zset.iter().skip(from).take(to - from + 1).collect()
    };

    let mut items = Vec::with_capacity(selected.len() * if with_scores { 2 } else { 1 });
    for (member, score) in selected {
        items.push(RespValue::bulk(member.clone()));
        if with_scores {
            items.push(RespValue::bulk(format_f64(score)));
        }
    }
    Ok(RespValue::array(items))
}

//! Keyspace commands that work on any value type.

use std::time::{Duration, SystemTime};

use super::{parse_i64, Arity, CommandError, CommandResult, CommandSpec, KeyPositions, Request};
use crate::protocol::RespValue;
use crate::storage::key::to_unix_millis;
use crate::storage::{Database, DatabaseKey};

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("del", Arity::AtLeast(1), del).keys(KeyPositions::All),
    CommandSpec::new("exists", Arity::AtLeast(1), exists).read_only(),
    CommandSpec::new("expire", Arity::Exact(2), expire),
    CommandSpec::new("pexpire", Arity::Exact(2), pexpire),
    CommandSpec::new("persist", Arity::Exact(1), persist),
    CommandSpec::new("ttl", Arity::Exact(1), ttl).read_only(),
    CommandSpec::new("pttl", Arity::Exact(1), pttl).read_only(),
    CommandSpec::new("type", Arity::Exact(1), key_type).read_only(),
    CommandSpec::new("keys", Arity::Exact(1), keys).read_only(),
    CommandSpec::new("rename", Arity::Exact(2), rename).keys(KeyPositions::All),
];

fn del(db: &Database, request: &Request<'_>) -> CommandResult {
    let removed = request.params().iter().filter(|key| db.remove(key)).count();
    Ok(RespValue::integer(removed as i64))
}

fn exists(db: &Database, request: &Request<'_>) -> CommandResult {
    let found = request.params().iter().filter(|key| db.contains(key)).count();
    Ok(RespValue::integer(found as i64))
}

fn expire(db: &Database, request: &Request<'_>) -> CommandResult {
    let seconds = parse_i64(request.param(1)?)?;
    let delta = seconds
        .checked_mul(1000)
        .ok_or_else(|| CommandError::InvalidExpire(request.name().to_string()))?;
    expire_in(db, request, delta)
}

fn pexpire(db: &Database, request: &Request<'_>) -> CommandResult {
    let millis = parse_i64(request.param(1)?)?;
    expire_in(db, request, millis)
}

/// Shared by EXPIRE and PEXPIRE. A non-positive delay deletes the key.
fn expire_in(db: &Database, request: &Request<'_>, millis: i64) -> CommandResult {
    let now = SystemTime::now();
    to_unix_millis(now)
        .checked_add(millis)
        .ok_or_else(|| CommandError::InvalidExpire(request.name().to_string()))?;
    let delay = Duration::from_millis(millis.unsigned_abs());
    let at = if millis >= 0 {
        now.checked_add(delay)
    } else {
        now.checked_sub(delay)
    }
    .ok_or_else(|| CommandError::InvalidExpire(request.name().to_string()))?;

    let updated = db.expire(request.param(0)?, Some(at));
    Ok(RespValue::integer(updated as i64))
}

fn persist(db: &Database, request: &Request<'_>) -> CommandResult {
    let key = request.param(0)?;
    let has_ttl = db
        .get_key(key)
        .map(|k| k.expires_at().is_some())
        .unwrap_or(false);
    let cleared = has_ttl && db.expire(key, None);
    Ok(RespValue::integer(cleared as i64))
}

fn ttl(db: &Database, request: &Request<'_>) -> CommandResult {
    remaining(db, request, |ttl| ((ttl.as_millis() + 500) / 1000) as i64)
}

fn pttl(db: &Database, request: &Request<'_>) -> CommandResult {
    remaining(db, request, |ttl| ttl.as_millis() as i64)
}

/// -2 when the key is absent, -1 when it has no expiration.
fn remaining(db: &Database, request: &Request<'_>, unit: fn(Duration) -> i64) -> CommandResult {
    let reply = match db.get_key(request.param(0)?) {
        None => -2,
        Some(key) => key.ttl().map(unit).unwrap_or(-1),
    };
    Ok(RespValue::integer(reply))
}

fn key_type(db: &Database, request: &Request<'_>) -> CommandResult {
    let name = db
        .data_type(request.param(0)?)
        .map(|t| t.name())
        .unwrap_or("none");
    Ok(RespValue::simple(name))
}

fn keys(db: &Database, request: &Request<'_>) -> CommandResult {
    let pattern = request.param(0)?;
    let matching = db
        .keys()
        .filter(|key| glob_match(pattern, key.name()))
        .map(|key| RespValue::bulk(key.name().clone()))
        .collect();
    Ok(RespValue::array(matching))
}

fn rename(db: &Database, request: &Request<'_>) -> CommandResult {
    let source = request.param(0)?;
    let target = request.param(1)?;

    let key = db.get_key(source).ok_or(CommandError::NoSuchKey)?;
    let value = db.get(source).ok_or(CommandError::NoSuchKey)?;
    if source != target {
        db.put(DatabaseKey::with_expiration(target.clone(), key.expires_at()), value);
        db.remove(source);
    }
    Ok(RespValue::ok())
}

/// Glob-style matching: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it currently absorbs up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let width = match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'[') => match class_match(&pattern[p..], text[t]) {
                Some((true, width)) => Some(width),
                Some((false, _)) => None,
                None => (text[t] == b'[').then_some(1),
            },
            Some(b'\\') if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(2),
            Some(&c) => (c == text[t]).then_some(1),
            None => None,
        };

        match (width, star) {
            (Some(width), _) => {
                p += width;
                t += 1;
            }
            (None, Some((star_p, star_t))) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches `c` against the class opening `pattern`. Returns whether it
/// matched and the width of the class, or `None` if it is unterminated.
fn class_match(pattern: &[u8], c: u8) -> Option<(bool, usize)> {
    let negate = pattern.get(1) == Some(&b'^');
    let mut i = if negate { 2 } else { 1 };
    let mut matched = false;

    loop {
        let b = *pattern.get(i)?;
        match b {
            b']' => break,
            b'\\' => {
                matched |= *pattern.get(i + 1)? == c;
                i += 2;
            }
            _ if pattern.get(i + 1) == Some(&b'-')
                && pattern.get(i + 2).is_some_and(|&end| end != b']') =>
            {
                let end = pattern[i + 2];
                matched |= (b.min(end)..=b.max(end)).contains(&c);
                i += 3;
            }
            _ => {
                matched |= b == c;
                i += 1;
            }
        }
    }

    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::{sorted, Harness};
    use crate::storage::DatabaseValue;

    #[test]
    fn test_del_and_exists() {
        let h = Harness::new();
        h.run(&["SET", "a", "1"]);
        h.run(&["SET", "b", "2"]);

        assert_eq!(h.run(&["EXISTS", "a", "b", "c"]), RespValue::integer(2));
        assert_eq!(h.run(&["DEL", "a", "c"]), RespValue::integer(1));
        assert_eq!(h.run(&["EXISTS", "a"]), RespValue::integer(0));
    }

    #[test]
    fn test_expire_zero_hides_key() {
        let h = Harness::new();
        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["EXPIRE", "k", "0"]), RespValue::integer(1));
        assert_eq!(h.run(&["GET", "k"]), RespValue::null());
        assert_eq!(h.run(&["EXPIRE", "k", "10"]), RespValue::integer(0));
    }

    #[test]
    fn test_ttl_and_persist() {
        let h = Harness::new();
        assert_eq!(h.run(&["TTL", "missing"]), RespValue::integer(-2));

        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(-1));
        assert_eq!(h.run(&["PERSIST", "k"]), RespValue::integer(0));

        assert_eq!(h.run(&["EXPIRE", "k", "100"]), RespValue::integer(1));
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(100));
        let RespValue::Integer(pttl) = h.run(&["PTTL", "k"]) else {
            panic!("expected integer");
        };
        assert!(pttl > 99_000 && pttl <= 100_000);

        assert_eq!(h.run(&["PERSIST", "k"]), RespValue::integer(1));
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(-1));
    }

    #[test]
    fn test_pexpire_invalid_argument() {
        let h = Harness::new();
        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["PEXPIRE", "k", "soon"]), CommandError::NotInteger.into());
        assert_eq!(
            h.run(&["EXPIRE", "k", &i64::MAX.to_string()]),
            CommandError::InvalidExpire("expire".to_string()).into()
        );
        assert_eq!(
            h.run(&["PEXPIRE", "k", &i64::MAX.to_string()]),
            CommandError::InvalidExpire("pexpire".to_string()).into()
        );
        assert_eq!(h.run(&["TTL", "k"]), RespValue::integer(-1));
    }

    #[test]
    fn test_type() {
        let h = Harness::new();
        h.db().put("z".into(), DatabaseValue::zset([(1.0, "a")]));
        h.db().put("b".into(), DatabaseValue::bitset([3]));
        assert_eq!(h.run(&["TYPE", "z"]), RespValue::simple("zset"));
        assert_eq!(h.run(&["TYPE", "b"]), RespValue::simple("bitset"));
        assert_eq!(h.run(&["TYPE", "nope"]), RespValue::simple("none"));
    }

    #[test]
    fn test_keys_pattern() {
        let h = Harness::new();
        for key in ["hello", "hallo", "hxllo", "world"] {
            h.run(&["SET", key, "1"]);
        }
        assert_eq!(sorted(h.run(&["KEYS", "h[ae]llo"])), vec!["hallo", "hello"]);
        assert_eq!(sorted(h.run(&["KEYS", "*"])).len(), 4);
        assert_eq!(sorted(h.run(&["KEYS", "w*"])), vec!["world"]);
    }

    #[test]
    fn test_rename_keeps_value_and_expiration() {
        let h = Harness::new();
        h.run(&["SET", "a", "1"]);
        h.run(&["EXPIRE", "a", "100"]);

        assert_eq!(h.run(&["RENAME", "a", "b"]), RespValue::ok());
        assert_eq!(h.run(&["GET", "b"]), RespValue::bulk("1"));
        assert_eq!(h.run(&["EXISTS", "a"]), RespValue::integer(0));
        assert_eq!(h.run(&["TTL", "b"]), RespValue::integer(100));

        assert_eq!(h.run(&["RENAME", "missing", "x"]), CommandError::NoSuchKey.into());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h*llo", b"hllo"));
        assert!(glob_match(b"h*llo", b"heeeello"));
        assert!(!glob_match(b"h*llo", b"hellox"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-b]llo", b"hbllo"));
        assert!(glob_match(b"a\\*", b"a*"));
        assert!(!glob_match(b"a\\*", b"ab"));
        assert!(glob_match(b"*:*", b"user:1"));
        assert!(!glob_match(b"abc", b"ab"));
    }
}

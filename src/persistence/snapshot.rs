//! Point-in-time snapshot of every keyspace.
//!
//! The file is a sequence of RESP tokens, so it shares its codec with the
//! network layer:
//!
//! ```text
//! *2 $14 CORAL-SNAPSHOT :1                      header
//! *5 :<db> $<key> (:<expires-at-ms> | $-1) +<type> <payload>   one per entry
//! ```
//!
//! Payloads: strings and bitsets are a bulk string, lists and sets an array
//! of bulks, hashes an array of alternating field/value bulks, sorted sets an
//! array of alternating member/score bulks.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use super::PersistenceError;
use crate::command::{format_f64, parse_f64};
use crate::protocol::{RespParser, RespValue};
use crate::storage::key::{from_unix_millis, to_unix_millis};
use crate::storage::{BitSet, DataType, Database, DatabaseKey, DatabaseValue, SortedSet};

pub const SNAPSHOT_MAGIC: &str = "CORAL-SNAPSHOT";
pub const SNAPSHOT_VERSION: i64 = 1;

/// One decoded snapshot record.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub db: usize,
    pub key: DatabaseKey,
    pub value: DatabaseValue,
}

/// Writes the header and every live entry of `databases` (indexed by
/// position). Returns the number of entries written.
pub fn write_snapshot<W: Write>(out: &mut W, databases: &[&Database]) -> Result<usize, PersistenceError> {
    let mut buf = Vec::with_capacity(4096);
    RespValue::array(vec![
        RespValue::bulk(SNAPSHOT_MAGIC),
        RespValue::integer(SNAPSHOT_VERSION),
    ])
    .write_to(&mut buf);
    out.write_all(&buf)?;

    let mut written = 0;
    for (index, db) in databases.iter().enumerate() {
        for (key, value) in db.entries() {
            buf.clear();
            encode_entry(index, &key, &value).write_to(&mut buf);
            out.write_all(&buf)?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

/// Decodes a complete snapshot. Any malformed or truncated record rejects
/// the whole file.
pub fn read_snapshot(data: &[u8]) -> Result<Vec<SnapshotEntry>, PersistenceError> {
    let mut parser = RespParser::from_bytes(data);

    match parser.parse()? {
        Some(header) => check_header(header)?,
        None if data.is_empty() => return Ok(Vec::new()),
        None => return Err(PersistenceError::Truncated),
    }

    let mut entries = Vec::new();
    while let Some(token) = parser.parse()? {
        entries.push(decode_entry(token)?);
    }
    if parser.remaining() > 0 {
        return Err(PersistenceError::Truncated);
    }
    Ok(entries)
}

/// Exports to `path` through a temporary file renamed over the target.
pub fn export_file(path: &Path, databases: &[&Database]) -> Result<usize, PersistenceError> {
    let tmp = path.with_extension("tmp");
    let written = {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let written = write_snapshot(&mut writer, databases)?;
        writer.get_ref().sync_all()?;
        written
    };
    fs::rename(&tmp, path)?;
    Ok(written)
}

/// Reads the snapshot at `path`. A missing file yields `None`.
pub fn read_file(path: &Path) -> Result<Option<Vec<SnapshotEntry>>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    read_snapshot(&data).map(Some)
}

/// Replaces the content of `databases` with `entries`. Entries that expired
/// while the snapshot sat on disk, or that target an unknown database, are
/// skipped. Returns the number of entries loaded.
pub fn load(databases: &[&Database], entries: Vec<SnapshotEntry>) -> usize {
    for db in databases {
        db.clear();
    }
    let now = SystemTime::now();
    let mut loaded = 0;
    for entry in entries {
        if entry.key.is_expired_at(now) {
            continue;
        }
        match databases.get(entry.db) {
            Some(db) => {
                db.put(entry.key, entry.value);
                loaded += 1;
            }
            None => tracing::warn!(db = entry.db, "snapshot entry for unknown database skipped"),
        }
    }
    loaded
}

fn check_header(token: RespValue) -> Result<(), PersistenceError> {
    match token {
        RespValue::Array(Some(items)) => match items.as_slice() {
            [RespValue::BulkString(Some(magic)), RespValue::Integer(version)]
                if magic.as_ref() == SNAPSHOT_MAGIC.as_bytes() =>
            {
                if *version == SNAPSHOT_VERSION {
                    Ok(())
                } else {
                    Err(PersistenceError::UnsupportedVersion(*version))
                }
            }
            _ => Err(PersistenceError::InvalidHeader),
        },
        _ => Err(PersistenceError::InvalidHeader),
    }
}

pub fn encode_entry(db: usize, key: &DatabaseKey, value: &DatabaseValue) -> RespValue {
    let expiration = match key.expires_at() {
        Some(at) => RespValue::integer(to_unix_millis(at)),
        None => RespValue::null(),
    };
    RespValue::array(vec![
        RespValue::integer(db as i64),
        RespValue::bulk(key.name().clone()),
        expiration,
        RespValue::simple(value.data_type().name()),
        encode_value(value),
    ])
}

fn encode_value(value: &DatabaseValue) -> RespValue {
    match value {
        DatabaseValue::String(s) => RespValue::bulk(s.clone()),
        DatabaseValue::Bitset(bits) => RespValue::bulk(Bytes::copy_from_slice(bits.as_bytes())),
        DatabaseValue::List(items) => {
            RespValue::array(items.iter().cloned().map(RespValue::bulk).collect())
        }
        DatabaseValue::Set(members) => {
            RespValue::array(members.iter().cloned().map(RespValue::bulk).collect())
        }
        DatabaseValue::Hash(fields) => RespValue::array(
            fields
                .iter()
                .flat_map(|(field, value)| [RespValue::bulk(field.clone()), RespValue::bulk(value.clone())])
                .collect(),
        ),
        DatabaseValue::ZSet(zset) => RespValue::array(
            zset.iter()
                .flat_map(|(member, score)| [RespValue::bulk(member.clone()), RespValue::bulk(format_f64(score))])
                .collect(),
        ),
    }
}

pub fn decode_entry(token: RespValue) -> Result<SnapshotEntry, PersistenceError> {
    let RespValue::Array(Some(items)) = token else {
        return Err(PersistenceError::UnexpectedToken("entry array"));
    };
    let [db, name, expiration, type_tag, payload]: [RespValue; 5] = items
        .try_into()
        .map_err(|_| PersistenceError::UnexpectedToken("five-element entry"))?;

    let db = match db {
        RespValue::Integer(n) if n >= 0 => n as usize,
        _ => return Err(PersistenceError::UnexpectedToken("database index")),
    };
    let name = expect_bulk(name, "key")?;
    let expires_at = match expiration {
        RespValue::Integer(ms) => Some(from_unix_millis(ms)),
        RespValue::BulkString(None) => None,
        _ => return Err(PersistenceError::UnexpectedToken("expiration")),
    };
    let data_type = match type_tag {
        RespValue::SimpleString(tag) => {
            DataType::from_name(&tag).ok_or(PersistenceError::UnknownType(tag))?
        }
        _ => return Err(PersistenceError::UnexpectedToken("type tag")),
    };

    Ok(SnapshotEntry {
        db,
        key: DatabaseKey::with_expiration(name, expires_at),
        value: decode_value(data_type, payload)?,
    })
}

fn decode_value(data_type: DataType, payload: RespValue) -> Result<DatabaseValue, PersistenceError> {
    match data_type {
        DataType::String => Ok(DatabaseValue::String(expect_bulk(payload, "string payload")?)),
        DataType::Bitset => Ok(DatabaseValue::Bitset(BitSet::from_bytes(
            expect_bulk(payload, "bitset payload")?.to_vec(),
        ))),
        DataType::List => Ok(DatabaseValue::List(
            expect_bulks(payload)?.into_iter().collect::<VecDeque<_>>(),
        )),
        DataType::Set => Ok(DatabaseValue::Set(
            expect_bulks(payload)?.into_iter().collect::<HashSet<_>>(),
        )),
        DataType::Hash => {
            let mut fields = HashMap::new();
            for (field, value) in pairs(expect_bulks(payload)?)? {
                fields.insert(field, value);
            }
            Ok(DatabaseValue::Hash(fields))
        }
        DataType::ZSet => {
            let mut zset = SortedSet::new();
            for (member, score) in pairs(expect_bulks(payload)?)? {
                let score = parse_f64(&score).map_err(|_| {
                    PersistenceError::InvalidNumber(String::from_utf8_lossy(&score).into_owned())
                })?;
                zset.insert(member, score);
            }
            Ok(DatabaseValue::ZSet(zset))
        }
    }
}

fn expect_bulk(token: RespValue, what: &'static str) -> Result<Bytes, PersistenceError> {
    match token {
        RespValue::BulkString(Some(data)) => Ok(data),
        _ => Err(PersistenceError::UnexpectedToken(what)),
    }
}

fn expect_bulks(token: RespValue) -> Result<Vec<Bytes>, PersistenceError> {
    match token {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .map(|item| expect_bulk(item, "collection element"))
            .collect(),
        _ => Err(PersistenceError::UnexpectedToken("collection payload")),
    }
}

fn pairs(items: Vec<Bytes>) -> Result<Vec<(Bytes, Bytes)>, PersistenceError> {
    if items.len() % 2 != 0 {
        return Err(PersistenceError::UnexpectedToken("even number of pair elements"));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
        out.push((a, b));
    }
    Ok(out)
}

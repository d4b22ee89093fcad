//! Bit vector commands. They operate on BITSET values only.

use super::{parse_i64, Arity, CommandError, CommandResult, CommandSpec, Request};
use crate::protocol::RespValue;
use crate::storage::{DataType, Database, DatabaseValue};

/// Highest addressable bit, matching the 512MB string limit.
const MAX_BIT_OFFSET: i64 = (1 << 32) - 1;

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("setbit", Arity::Exact(3), setbit).typed(DataType::Bitset),
    CommandSpec::new("getbit", Arity::Exact(2), getbit).read_only().typed(DataType::Bitset),
    CommandSpec::new("bitcount", Arity::Exact(1), bitcount).read_only().typed(DataType::Bitset),
];

fn parse_offset(data: &[u8]) -> Result<usize, CommandError> {
    match parse_i64(data) {
        Ok(offset) if (0..=MAX_BIT_OFFSET).contains(&offset) => Ok(offset as usize),
        _ => Err(CommandError::BitOffset),
    }
}

fn setbit(db: &Database, request: &Request<'_>) -> CommandResult {
    let offset = parse_offset(request.param(1)?)?;
    let on = match &request.param(2)?[..] {
        b"0" => false,
        b"1" => true,
        _ => return Err(CommandError::BitValue),
    };

    let mut previous = false;
    db.merge(request.param(0)?, DataType::Bitset.empty(), |current, _| {
        let mut bits = current.as_bitset()?.clone();
        previous = bits.set(offset, on);
        Ok::<_, CommandError>(DatabaseValue::Bitset(bits))
    })?;
    Ok(RespValue::integer(previous as i64))
}

fn getbit(db: &Database, request: &Request<'_>) -> CommandResult {
    let offset = parse_offset(request.param(1)?)?;
    let bit = match db.get(request.param(0)?) {
        Some(value) => value.as_bitset()?.get(offset),
        None => false,
    };
    Ok(RespValue::integer(bit as i64))
}

fn bitcount(db: &Database, request: &Request<'_>) -> CommandResult {
    let count = match db.get(request.param(0)?) {
        Some(value) => value.as_bitset()?.count(),
        None => 0,
    };
    Ok(RespValue::integer(count as i64))
}

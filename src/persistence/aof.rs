//! Append-only command log.
//!
//! Every mutating command is written as a RESP array of bulk strings, the
//! same encoding clients send. The log only holds commands issued since the
//! last snapshot; it is recreated empty each time a snapshot is taken.

use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::PersistenceError;
use crate::protocol::{RespParser, RespValue};

/// Writer for the append-only log.
#[derive(Debug)]
pub struct AofWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AofWriter {
    /// Creates (or truncates) the log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let writer = Some(Self::open(&path)?);
        Ok(Self { path, writer })
    }

    fn open(path: &Path) -> Result<BufWriter<File>, PersistenceError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(BufWriter::new(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one command and flushes it to the OS.
    pub fn append(&mut self, args: &[Bytes]) -> Result<(), PersistenceError> {
        let writer = self.writer.as_mut().ok_or(PersistenceError::Closed)?;
        let record = RespValue::command(args.iter().cloned()).to_bytes();
        writer.write_all(&record)?;
        writer.flush()?;
        Ok(())
    }

    /// Closes the current log and starts an empty one in its place.
    pub fn recreate(&mut self) -> Result<(), PersistenceError> {
        self.close()?;
        self.writer = Some(Self::open(&self.path)?);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), PersistenceError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

/// Commands recovered from a log file.
#[derive(Debug, Default, PartialEq)]
pub struct LogContents {
    pub commands: Vec<Vec<Bytes>>,
    /// Bytes after the last complete record that could not be decoded.
    pub discarded: usize,
}

/// Decodes every complete record of `data`. Decoding stops at the first
/// malformed or partial record; everything before it is kept.
pub fn read_commands(data: &[u8]) -> LogContents {
    let mut parser = RespParser::from_bytes(data);
    let mut commands = Vec::new();

    loop {
        let before = parser.remaining();
        match parser.parse() {
            Ok(Some(token)) => match token.into_command_parts() {
                Some(args) => commands.push(args),
                None => {
                    return LogContents {
                        commands,
                        discarded: before,
                    }
                }
            },
            Ok(None) | Err(_) => {
                return LogContents {
                    commands,
                    discarded: before,
                }
            }
        }
    }
}

/// Reads the log at `path`. A missing file is an empty log.
pub fn read_file(path: &Path) -> Result<LogContents, PersistenceError> {
    if !path.exists() {
        return Ok(LogContents::default());
    }
    let data = fs::read(path)?;
    Ok(read_commands(&data))
}

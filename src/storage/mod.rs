//! Keyspace storage: typed values, keys with expiration and the concurrent
//! database container.

pub mod database;
pub mod key;
pub mod value;

pub use database::Database;
pub use key::DatabaseKey;
pub use value::{BitSet, DataType, DatabaseValue, SortedSet};

/// Errors raised by storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("wrong type: expected {expected}, found {found}")]
    WrongType { expected: DataType, found: DataType },
}

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use command::{CommandError, CommandRegistry, CommandSpec};
pub use persistence::{PersistenceError, PersistenceManager};
pub use protocol::{RespParser, RespValue};
pub use server::{Handler, ServerContext};
pub use session::Session;
pub use storage::{DataType, Database, DatabaseKey, DatabaseValue, StorageError};

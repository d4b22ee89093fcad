//! Application-level error types for the coral-db server.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics initialization failed: {0}")]
    MetricsInit(String),

    #[error("metrics export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

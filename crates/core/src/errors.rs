//! Core error types for barsync.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use chrono::ParseError as ChronoParseError;
use thiserror::Error;

use barsync_market_data::MarketDataError;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the sync pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Credentials were rejected. Fatal for the calling pipeline.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The token endpoint stayed unreachable after every retry.
    #[error("Authentication service unavailable: {0}")]
    TransientAuth(String),

    #[error("Market data operation failed: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Daily call budget exhausted: {used}/{limit} calls used, {required} required")]
    BudgetExhausted { used: u32, limit: u32, required: u32 },

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Token store error: {0}")]
    TokenStore(String),

    #[error("Input validation failed: {0}")]
    Validation(String),

    #[error("Worker stopped: {0}")]
    WorkerStopped(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Errors that must abort the run rather than fail a single task.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Auth(_) | Error::TransientAuth(_) | Error::InvalidConfigValue(_) => true,
            Error::Database(db) => matches!(
                db,
                DatabaseError::ConnectionFailed(_)
                    | DatabaseError::PoolCreationFailed(_)
                    | DatabaseError::MigrationFailed(_)
            ),
            _ => false,
        }
    }
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

// === From implementations for common error types ===

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::TokenStore(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<ChronoParseError> for Error {
    fn from(err: ChronoParseError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

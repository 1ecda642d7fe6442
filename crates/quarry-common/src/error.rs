//! Error types for Quarry
//!
//! Hard failures only: programming mistakes, bad configuration and corrupt
//! streams. Soft query-time failures travel through the diagnostics sink of the
//! column crate instead.

use thiserror::Error;

/// Result type alias using Quarry's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Quarry
#[derive(Error, Debug)]
pub enum Error {
    // Column Errors
    #[error("Column error: {0}")]
    Column(#[from] ColumnError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Column-related errors
#[derive(Error, Debug)]
pub enum ColumnError {
    #[error("LocalId {lid} out of range for column of {count} items")]
    IdOutOfRange { lid: usize, count: usize },

    #[error("Capacity exceeded: {requested} items requested")]
    CapacityExceeded { requested: usize },

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Wrapper '{wrapper}' cannot wrap core type '{core_type}'")]
    UnsupportedWrapper { wrapper: String, core_type: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Shorthand for an out-of-range LocalId
    pub fn out_of_range(lid: usize, count: usize) -> Self {
        Error::Column(ColumnError::IdOutOfRange { lid, count })
    }

    /// Shorthand for a corrupt binary stream
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Error::Column(ColumnError::CorruptData(reason.into()))
    }

    /// Check if error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Column(ColumnError::CorruptData(_)))
            || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }

    /// Stable numeric code for callers that log or map errors
    pub fn code(&self) -> i32 {
        match self {
            Error::Column(ColumnError::IdOutOfRange { .. }) => 1,
            Error::Column(ColumnError::CapacityExceeded { .. }) => 2,
            Error::Column(ColumnError::MissingArgument(_)) => 3,
            Error::Column(ColumnError::CorruptData(_)) => 4,
            Error::Column(ColumnError::TypeMismatch { .. }) => 5,
            Error::Column(ColumnError::UnsupportedWrapper { .. }) => 6,
            Error::Config(_) => 17,
            Error::Io(_) => 20,
            Error::Serialization(_) => 21,
            Error::Internal(_) => 99,
        }
    }
}

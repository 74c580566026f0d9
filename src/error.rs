//! Error types for Cassette

use std::io;
use thiserror::Error;

/// Result type for Cassette operations
pub type Result<T> = std::result::Result<T, CassetteError>;

/// Errors that can occur in Cassette
#[derive(Debug, Error)]
pub enum CassetteError {
    /// I/O error, including backend/path conflicts detected at construction
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad store path/format combination or unsupported encoding
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fingerprint absent from the fixture store
    #[error("Cassette '{0}' does not exist in library")]
    NotFound(String),

    /// Fixture file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An uncached request was attempted while the real network is disabled
    #[error("Attempted HTTP connection while network is disabled: {0}")]
    AttemptedConnection(String),

    /// The wrapped transport failed while performing a real request
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CassetteError {
    /// Whether this error is the internal "fingerprint absent" signal
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for CassetteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for CassetteError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(format!("YAML: {err}"))
    }
}

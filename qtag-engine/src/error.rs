//! Error types for qtag-engine

use thiserror::Error;

/// A single resolution attempt failed
///
/// Every variant is transient: the scheduler counts it toward backoff and
/// the item stays eligible for a later reconciliation pass.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Engine setup error
#[derive(Debug, Error)]
pub enum EngineError {
    /// qtag-common error (config, storage, IO)
    #[error("Common error: {0}")]
    Common(#[from] qtag_common::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration is present but unusable for the requested wiring
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

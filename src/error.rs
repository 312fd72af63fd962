//! Error types for Focus Flux

use thiserror::Error;

/// Errors that can occur around the adaptation controller
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("Ingestion failed: {0}")]
    IngestionFailure(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed attention signal: {0}")]
    MalformedSignal(String),

    #[error("Missing generated payload: {0}")]
    MissingGeneratedPayload(String),

    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Payload does not match content type: expected {expected}, got {actual}")]
    PayloadMismatch { expected: String, actual: String },

    #[error("Refresh requested for revision {requested} but current revision is {current}")]
    StaleRefresh { requested: u64, current: u64 },

    #[error("Break {0} is running; content stays unchanged until it ends")]
    BreakActive(uuid::Uuid),

    #[error("No content loaded")]
    NoContentLoaded,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Viewer runtime is not running")]
    RuntimeClosed,
}

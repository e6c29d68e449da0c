//! Error types for the metric bridge.

use thiserror::Error;

/// Errors raised while translating legacy metrics or wiring the pipeline.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An attribute token in a qualified identifier has no `=` separator.
    #[error("malformed attribute token `{token}` in `{identifier}`: expected key=value")]
    MalformedAttribute { identifier: String, token: String },

    /// The shared pipeline was already built from a different configuration.
    #[error("OpenTelemetry has already been initialized with different configs: {existing}")]
    ConfigConflict { existing: String },

    #[error("unsupported metrics exporter: {0}")]
    UnsupportedExporter(String),

    #[error("invalid contextual label `{0}`: expected key=value")]
    InvalidLabel(String),

    #[error("invalid otel properties: {0}")]
    Properties(#[from] serde_json::Error),

    #[error("failed to register instrument `{name}`: {reason}")]
    Registration { name: String, reason: String },

    #[error("failed to close instrument `{name}`: {reason}")]
    Close { name: String, reason: String },

    /// The meter provider could not be flushed or shut down.
    #[error("metrics pipeline error: {0}")]
    Pipeline(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

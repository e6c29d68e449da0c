//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging for the bridge itself
//! - The process-wide OpenTelemetry metrics pipeline bridged metrics land in

pub mod pipeline;
pub mod tracing;

//! Meterbridge: exports dynamically registered legacy metrics through OpenTelemetry.
//!
//! Legacy metrics (tag-based metric names or registry-listener names with a
//! qualified identifier) come and go at runtime. Meterbridge listens to those
//! lifecycle events and keeps one set of asynchronous OpenTelemetry
//! instruments per legacy metric, reading values from the live metric at
//! collection time.
//!
//! # Modules
//!
//! - [`config`]: CLI, environment and `otel.*` property configuration
//! - [`naming`]: Case conversions and the naming context
//! - [`descriptor`]: Instrument names and attributes derived from legacy names
//! - [`legacy`]: The legacy metric model and an in-process notification source
//! - [`instrument`]: The instrument sink boundary (OpenTelemetry and in-memory)
//! - [`dispatch`]: Maps each kind of legacy metric onto instruments
//! - [`registry`]: Tracks live instruments per legacy metric
//! - [`reporter`]: Tag-based and registry-listener reporters
//! - [`observability`]: Logging and the shared metrics pipeline

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // descriptor::tagged::TaggedDescriptorBuilder is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::cast_precision_loss,     // u64 counts are exported as f64 gauges
    clippy::similar_names,           // min/max/mean are fine
    clippy::too_many_lines           // Some functions are inherently long
)]

pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod legacy;
pub mod naming;
pub mod observability;
pub mod registry;
pub mod reporter;

pub use error::{BridgeError, Result};

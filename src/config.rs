//! Configuration for the metric bridge.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - `otel.*` properties handed over by a host metrics system

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::naming::context::NAMESPACE_KEY;

/// Prefix of the properties that configure the OpenTelemetry pipeline.
pub const OTEL_PROPERTY_PREFIX: &str = "otel.";

const DEFAULT_SERVICE_NAME: &str = "meterbridge";
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Where collected metrics go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExporterKind {
    /// Periodic OTLP/gRPC export.
    Otlp,
    /// Metrics are collected on demand only.
    #[default]
    Disabled,
}

impl FromStr for ExporterKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otlp" => Ok(ExporterKind::Otlp),
            "none" | "" => Ok(ExporterKind::Disabled),
            other => Err(BridgeError::UnsupportedExporter(other.to_string())),
        }
    }
}

impl TryFrom<String> for ExporterKind {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExporterKind> for String {
    fn from(kind: ExporterKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExporterKind::Otlp => f.write_str("otlp"),
            ExporterKind::Disabled => f.write_str("none"),
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_export_interval() -> Duration {
    DEFAULT_EXPORT_INTERVAL
}

/// Durations carried as millisecond strings, the way `otel.*` properties are.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.as_millis().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(serde::de::Error::custom)
    }
}

/// Everything that shapes the process-wide OpenTelemetry pipeline.
///
/// Two configurations are interchangeable only if they are equal, including
/// any extra `otel.*` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "otel.metrics.exporter", default)]
    pub exporter: ExporterKind,

    #[serde(rename = "otel.service.name", default = "default_service_name")]
    pub service_name: String,

    #[serde(
        rename = "otel.exporter.otlp.endpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub endpoint: Option<String>,

    #[serde(
        rename = "otel.metric.export.interval",
        default = "default_export_interval",
        with = "millis"
    )]
    pub export_interval: Duration,

    /// Remaining `otel.*` properties, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterKind::default(),
            service_name: default_service_name(),
            endpoint: None,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            extra: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from host properties. Keys outside the
    /// `otel.` namespace are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let otel: serde_json::Map<String, serde_json::Value> = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(OTEL_PROPERTY_PREFIX))
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(otel))?)
    }

    /// A stable rendering used in diagnostics.
    pub fn snapshot(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Meterbridge: exports dynamically registered legacy metrics through OpenTelemetry.
#[derive(Parser, Debug, Clone)]
#[command(name = "meterbridge")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "METERBRIDGE_LOG_JSON")]
    pub log_json: bool,

    /// Service name reported on every exported metric
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    /// Metrics exporter (otlp, none)
    #[arg(long, env = "OTEL_METRICS_EXPORTER", default_value = "none")]
    pub exporter: ExporterKind,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// Seconds between periodic exports
    #[arg(long, env = "METERBRIDGE_EXPORT_INTERVAL_SECS", default_value_t = 10)]
    pub export_interval_secs: u64,

    /// Namespace prefixed to every instrument name
    #[arg(long, env = "METERBRIDGE_NAMESPACE", default_value = "kafka.server")]
    pub namespace: String,

    /// Contextual label added to every instrument (repeatable)
    #[arg(long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,

    /// Milliseconds between updates of the demo metrics
    #[arg(long, env = "METERBRIDGE_TICK_MS", default_value_t = 1000)]
    pub tick_ms: u64,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The pipeline configuration described by these arguments.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            exporter: self.exporter,
            service_name: self.service_name.clone(),
            endpoint: self.otel_endpoint.clone(),
            export_interval: Duration::from_secs(self.export_interval_secs),
            extra: BTreeMap::new(),
        }
    }

    /// Contextual labels, with the namespace under its reserved key.
    pub fn context_labels(&self) -> Result<Vec<(String, String)>> {
        let mut labels = vec![(NAMESPACE_KEY.to_string(), self.namespace.clone())];
        for label in &self.labels {
            let (key, value) = label
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| BridgeError::InvalidLabel(label.clone()))?;
            labels.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(labels)
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            log_level: "debug".into(),
            labels: vec!["kafka.cluster.id=test-cluster".into()],
            tick_ms: 10,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_json: false,
            service_name: DEFAULT_SERVICE_NAME.into(),
            exporter: ExporterKind::Disabled,
            otel_endpoint: None,
            export_interval_secs: 10,
            namespace: "kafka.server".into(),
            labels: Vec::new(),
            tick_ms: 1000,
        }
    }
}

//! The process-wide OpenTelemetry metrics pipeline.
//!
//! The pipeline is built once per process and shared by every reporter. A
//! later request with a different configuration is an error rather than a
//! silent rebuild; the first configuration stays authoritative.
//!
//! Every reader uses delta temporality. The bridge removes instruments by
//! no longer observing them, and only a delta reader forgets a series that
//! was not observed in the last collection.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::data::{ResourceMetrics, Temporality};
use opentelemetry_sdk::metrics::reader::{MetricReader, TemporalitySelector};
use opentelemetry_sdk::metrics::{InstrumentKind, ManualReader, Pipeline as SdkPipeline, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use tokio::runtime::{EnterGuard, Runtime};

use crate::config::{ExporterKind, PipelineConfig};
use crate::error::{BridgeError, Result};
use crate::instrument::OtelInstrumentSink;

/// Instrumentation scope of every instrument the bridge registers.
pub const METER_NAME: &str = "meterbridge";

static GLOBAL: SingletonPipeline = SingletonPipeline::new();

/// The shared pipeline of this process.
pub fn global() -> &'static SingletonPipeline {
    &GLOBAL
}

/// Selects delta temporality for every instrument kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaTemporality;

impl TemporalitySelector for DeltaTemporality {
    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        Temporality::Delta
    }
}

/// A manual reader that can be registered on a provider and still be read
/// by its owner.
#[derive(Debug, Clone)]
pub struct SharedReader {
    reader: Arc<ManualReader>,
}

impl Default for SharedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedReader {
    pub fn new() -> Self {
        let reader = ManualReader::builder()
            .with_temporality_selector(DeltaTemporality)
            .build();
        Self {
            reader: Arc::new(reader),
        }
    }

    /// Run one collection and return what it produced.
    pub fn read(&self) -> Result<ResourceMetrics> {
        let mut metrics = ResourceMetrics {
            resource: Resource::empty(),
            scope_metrics: Vec::new(),
        };
        self.reader
            .collect(&mut metrics)
            .map_err(|e| BridgeError::Pipeline(e.to_string()))?;
        Ok(metrics)
    }
}

impl TemporalitySelector for SharedReader {
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.reader.temporality(kind)
    }
}

impl MetricReader for SharedReader {
    fn register_pipeline(&self, pipeline: Weak<SdkPipeline>) {
        self.reader.register_pipeline(pipeline);
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> opentelemetry::metrics::Result<()> {
        self.reader.collect(rm)
    }

    fn force_flush(&self) -> opentelemetry::metrics::Result<()> {
        self.reader.force_flush()
    }

    fn shutdown(&self) -> opentelemetry::metrics::Result<()> {
        self.reader.shutdown()
    }
}

/// Runtime owned by the pipeline for the periodic exporter, so building it
/// does not depend on the caller's thread running tokio.
struct ExportRuntime(Option<Runtime>);

impl ExportRuntime {
    fn none() -> Self {
        Self(None)
    }

    fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("meterbridge-export")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Pipeline(format!("failed to start export runtime: {e}")))?;
        Ok(Self(Some(runtime)))
    }

    fn enter(&self) -> Option<EnterGuard<'_>> {
        self.0.as_ref().map(Runtime::enter)
    }
}

impl fmt::Debug for ExportRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExportRuntime").field(&self.0.is_some()).finish()
    }
}

impl Drop for ExportRuntime {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async code.
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// A built meter provider and the configuration it was built from.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    provider: SdkMeterProvider,
    sink: OtelInstrumentSink,
    reader: Option<SharedReader>,
    // Declared last so the provider shuts down while its runtime still runs.
    runtime: ExportRuntime,
}

impl Pipeline {
    fn build(config: &PipelineConfig) -> Result<Self> {
        let resource = Resource::new([KeyValue::new("service.name", config.service_name.clone())]);

        let (provider, reader, runtime) = match (config.exporter, config.endpoint.as_deref()) {
            (ExporterKind::Otlp, Some(endpoint)) => {
                let runtime = ExportRuntime::start()?;
                let built = {
                    let _entered = runtime.enter();
                    otlp_provider(config, endpoint, resource.clone())
                };
                match built {
                    Ok(provider) => {
                        tracing::info!(
                            endpoint,
                            interval_ms = config.export_interval.as_millis() as u64,
                            "OTLP metrics exporter configured"
                        );
                        (provider, None, runtime)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics will not be exported");
                        let (provider, reader) = manual_provider(resource);
                        (provider, Some(reader), ExportRuntime::none())
                    }
                }
            }
            (ExporterKind::Otlp, None) => {
                tracing::warn!("OTLP exporter selected without an endpoint, metrics will not be exported");
                let (provider, reader) = manual_provider(resource);
                (provider, Some(reader), ExportRuntime::none())
            }
            (ExporterKind::Disabled, _) => {
                tracing::info!("Metrics export disabled, collecting on demand only");
                let (provider, reader) = manual_provider(resource);
                (provider, Some(reader), ExportRuntime::none())
            }
        };

        let sink = OtelInstrumentSink::new(provider.meter(METER_NAME));
        Ok(Self {
            config: config.clone(),
            provider,
            sink,
            reader,
            runtime,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// A meter in the bridge's instrumentation scope.
    pub fn meter(&self) -> Meter {
        self.provider.meter(METER_NAME)
    }

    /// The sink every reporter on this pipeline registers instruments on.
    ///
    /// Clones share one instrument table, so a name is registered with the
    /// SDK once no matter how many reporters use it.
    pub fn sink(&self) -> OtelInstrumentSink {
        self.sink.clone()
    }

    /// Collect the current metrics on demand. Only available when metrics
    /// are not exported periodically.
    pub fn collect(&self) -> Result<ResourceMetrics> {
        match &self.reader {
            Some(reader) => reader.read(),
            None => Err(BridgeError::Pipeline(
                "metrics are exported periodically and cannot be collected on demand".into(),
            )),
        }
    }

    /// Flush pending exports and stop the provider.
    pub fn shutdown(&self) -> Result<()> {
        let _entered = self.runtime.enter();
        self.provider
            .shutdown()
            .map_err(|e| BridgeError::Pipeline(e.to_string()))
    }
}

fn otlp_provider(
    config: &PipelineConfig,
    endpoint: &str,
    resource: Resource,
) -> opentelemetry::metrics::Result<SdkMeterProvider> {
    use opentelemetry_otlp::{Protocol, WithExportConfig};

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc);

    opentelemetry_otlp::new_pipeline()
        .metrics(opentelemetry_sdk::runtime::Tokio)
        .with_exporter(exporter)
        .with_resource(resource)
        .with_period(config.export_interval)
        .with_temporality_selector(DeltaTemporality)
        .build()
}

// No exporter configured: metrics are recorded and can be read on demand.
fn manual_provider(resource: Resource) -> (SdkMeterProvider, SharedReader) {
    let reader = SharedReader::new();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_resource(resource)
        .build();
    (provider, reader)
}

/// Builds the pipeline at most once and guards its configuration.
#[derive(Debug)]
pub struct SingletonPipeline {
    cell: OnceLock<Pipeline>,
}

impl Default for SingletonPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SingletonPipeline {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the pipeline, building it from `config` on first use.
    ///
    /// Fails with [`BridgeError::ConfigConflict`] when the pipeline exists
    /// and was built from a different configuration, and with
    /// [`BridgeError::Pipeline`] when it cannot be built.
    pub fn get_or_init(&self, config: &PipelineConfig) -> Result<&Pipeline> {
        if self.cell.get().is_none() {
            let built = Pipeline::build(config)?;
            let provider = built.provider.clone();
            match self.cell.set(built) {
                Ok(()) => global::set_meter_provider(provider),
                Err(lost) => {
                    // Another caller finished first; its pipeline is the one in use.
                    let _ = lost.shutdown();
                }
            }
        }

        let pipeline = self
            .cell
            .get()
            .ok_or_else(|| BridgeError::Pipeline("pipeline was not initialized".into()))?;
        if pipeline.config() != config {
            return Err(BridgeError::ConfigConflict {
                existing: pipeline.config().snapshot(),
            });
        }
        Ok(pipeline)
    }

    pub fn get(&self) -> Option<&Pipeline> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_config_returns_same_pipeline() {
        let singleton = SingletonPipeline::new();
        let config = PipelineConfig::default();

        let first = singleton.get_or_init(&config).unwrap();
        let second = singleton.get_or_init(&config.clone()).unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_different_config_conflicts() {
        let singleton = SingletonPipeline::new();
        singleton.get_or_init(&PipelineConfig::default()).unwrap();

        let other = PipelineConfig {
            export_interval: Duration::from_secs(60),
            ..PipelineConfig::default()
        };
        let err = singleton.get_or_init(&other).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("OpenTelemetry has already been initialized with different configs"));

        // The first configuration stays in place.
        assert_eq!(singleton.get().unwrap().config(), &PipelineConfig::default());
    }

    #[test]
    fn test_otlp_without_endpoint_falls_back() {
        let singleton = SingletonPipeline::new();
        let config = PipelineConfig {
            exporter: ExporterKind::Otlp,
            ..PipelineConfig::default()
        };
        let pipeline = singleton.get_or_init(&config).unwrap();
        assert_eq!(pipeline.config().exporter, ExporterKind::Otlp);
        assert!(pipeline.collect().is_ok());
    }

    /// Host metrics systems configure reporters from plain threads.
    #[test]
    fn test_otlp_pipeline_builds_without_ambient_runtime() {
        assert!(tokio::runtime::Handle::try_current().is_err());

        let singleton = SingletonPipeline::new();
        let config = PipelineConfig {
            exporter: ExporterKind::Otlp,
            endpoint: Some("http://127.0.0.1:4317".into()),
            export_interval: Duration::from_secs(60),
            ..PipelineConfig::default()
        };
        let pipeline = singleton.get_or_init(&config).unwrap();

        assert!(pipeline.runtime.0.is_some());
        assert!(pipeline.collect().is_err());
        let _meter = pipeline.meter();
        // Nothing listens on the endpoint; only completion matters here.
        let _ = pipeline.shutdown();
    }

    #[test]
    fn test_disabled_pipeline_collects_on_demand() {
        let singleton = SingletonPipeline::new();
        let pipeline = singleton.get_or_init(&PipelineConfig::default()).unwrap();
        assert!(pipeline.runtime.0.is_none());

        let metrics = pipeline.collect().unwrap();
        assert!(metrics.scope_metrics.iter().all(|scope| scope.metrics.is_empty()));
    }
}

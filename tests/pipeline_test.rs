//! Tests for the process-wide pipeline.
//!
//! Runs in its own test binary so the global pipeline starts uninitialized.

use std::sync::Arc;
use std::time::Duration;

use meterbridge::config::{ExporterKind, PipelineConfig};
use meterbridge::descriptor::TaggedMetricName;
use meterbridge::error::BridgeError;
use meterbridge::legacy::{LegacyMetric, ManualCounter};
use meterbridge::naming::context::NAMESPACE_KEY;
use meterbridge::naming::NamingContext;
use meterbridge::observability::pipeline::{self, Pipeline};
use meterbridge::reporter::TaggedMetricsReporter;
use opentelemetry_sdk::metrics::data::Sum;

/// Counter values exported under `name` by one collection.
fn counter_points(pipeline: &Pipeline, name: &str) -> Vec<u64> {
    let metrics = pipeline.collect().unwrap();
    metrics
        .scope_metrics
        .iter()
        .flat_map(|scope| scope.metrics.iter())
        .filter(|metric| metric.name == name)
        .filter_map(|metric| metric.data.as_any().downcast_ref::<Sum<u64>>())
        .flat_map(|sum| sum.data_points.iter().map(|point| point.value))
        .collect()
}

/// The global pipeline is built once and rejects a second, different configuration.
#[test]
fn test_global_pipeline_compare_and_fail() {
    let config = PipelineConfig {
        service_name: "pipeline-test".into(),
        exporter: ExporterKind::Disabled,
        export_interval: Duration::from_millis(500),
        ..PipelineConfig::default()
    };

    let first = pipeline::global().get_or_init(&config).unwrap();
    let again = pipeline::global().get_or_init(&config).unwrap();
    assert!(std::ptr::eq(first, again));

    let different = PipelineConfig {
        service_name: "someone-else".into(),
        ..config.clone()
    };
    match pipeline::global().get_or_init(&different) {
        Err(BridgeError::ConfigConflict { existing }) => {
            assert!(existing.contains("pipeline-test"), "snapshot should name the first config: {existing}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("a different configuration must be rejected"),
    }

    // Instruments registered on the global pipeline are exported until closed.
    let reporter = TaggedMetricsReporter::new(
        Arc::new(first.sink()),
        NamingContext::from_labels([(NAMESPACE_KEY, "kafka.server")]),
    );
    let id = TaggedMetricName::new("kafka.server", "messages-in-total");
    let counter = Arc::new(ManualCounter::new());
    counter.set(7);
    reporter.metric_change(&id, &LegacyMetric::Counter(counter.clone()));
    assert_eq!(reporter.registry().instrument_count(&id), Some(1));

    let name = "kafka.server.messagesIn.count";
    assert_eq!(counter_points(first, name), [7]);
    counter.add(3);
    assert_eq!(counter_points(first, name), [3]);

    reporter.close();
    assert!(reporter.registry().is_empty());
    assert!(counter_points(first, name).is_empty());

    first.shutdown().unwrap();
}

//! Meterbridge: exports dynamically registered legacy metrics through OpenTelemetry.
//!
//! # Usage
//!
//! ```bash
//! meterbridge --exporter otlp --otel-endpoint http://localhost:4317 --label kafka.cluster.id=dev
//! ```
//!
//! Environment variables can also be used:
//! - `OTEL_METRICS_EXPORTER`: Metrics exporter (otlp, none)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `METERBRIDGE_NAMESPACE`: Namespace of every instrument name
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! The binary drives a set of in-process sample metrics through both
//! reporters so the bridge can be observed end to end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meterbridge::config::Config;
use meterbridge::descriptor::{QualifiedMetricName, TaggedMetricName};
use meterbridge::instrument::InstrumentSink;
use meterbridge::legacy::{
    LegacyMetric, LegacyMetricsRegistry, ManualCounter, ManualGauge, ManualHistogram, ManualMeter,
    ManualTimer, MetricsListener, RateUnit, Rates, Summary,
};
use meterbridge::naming::NamingContext;
use meterbridge::observability::pipeline;
use meterbridge::observability::tracing::init_tracing;
use meterbridge::reporter::{QualifiedMetricsReporter, TaggedMetricsReporter};
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Meterbridge v{} - legacy metrics to OpenTelemetry

  Configuration:
    Service:    {}
    Exporter:   {}
    Endpoint:   {}
    Namespace:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.service_name,
        config.exporter,
        config.otel_endpoint.as_deref().unwrap_or("-"),
        config.namespace,
    );
}

/// Sample metrics updated on every tick.
struct DemoMetrics {
    requests: Arc<ManualCounter>,
    bytes_in: Arc<ManualMeter>,
    request_latency: Arc<ManualTimer>,
    batch_size: Arc<ManualHistogram>,
    queue_depth: Arc<ManualGauge>,
}

impl DemoMetrics {
    fn new() -> Self {
        Self {
            requests: Arc::new(ManualCounter::new()),
            bytes_in: Arc::new(ManualMeter::new("bytes", RateUnit::Seconds)),
            request_latency: Arc::new(ManualTimer::new(RateUnit::Milliseconds)),
            batch_size: Arc::new(ManualHistogram::new()),
            queue_depth: Arc::new(ManualGauge::with_value(0_i64)),
        }
    }

    fn tick(&self, tick: u64) {
        let step = tick % 10;
        self.requests.add(10 + step);

        self.bytes_in.mark(1024 * (step + 1));
        let rate = (1024 * (step + 1)) as f64;
        self.bytes_in.set_rates(Rates {
            mean: rate,
            one_minute: rate * 0.9,
            five_minute: rate * 0.8,
            fifteen_minute: rate * 0.7,
        });

        let latencies: Vec<f64> = (1..=20).map(|i| f64::from(i) * (1.0 + step as f64 / 10.0)).collect();
        let sum: f64 = latencies.iter().sum();
        let summary = Summary {
            max: latencies.iter().copied().fold(f64::MIN, f64::max),
            min: latencies.iter().copied().fold(f64::MAX, f64::min),
            mean: sum / latencies.len() as f64,
            sum,
            std_dev: 1.0 + step as f64,
        };
        self.request_latency.meter().mark(20);
        self.request_latency.set_summary(summary);
        self.request_latency.set_samples(latencies.clone());

        self.batch_size.set_count(tick);
        self.batch_size.set_summary(summary);
        self.batch_size.set_samples(latencies);

        self.queue_depth.set(i64::try_from(step).unwrap_or_default());
    }
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        // Wait for SIGTERM or SIGINT (Ctrl+C)
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.service_name, &config.log_level, config.log_json);

    let labels = config.context_labels()?;
    let context = NamingContext::from_labels(labels.iter().map(|(k, v)| (k.as_str(), v.clone())));

    let otel = pipeline::global()
        .get_or_init(&config.pipeline_config())
        .context("failed to initialize the metrics pipeline")?;

    print_banner(&config);

    let sink: Arc<dyn InstrumentSink> = Arc::new(otel.sink());
    let metrics = DemoMetrics::new();
    metrics.tick(0);

    // Tag-based metrics are pushed straight into their reporter.
    let tagged = TaggedMetricsReporter::new(Arc::clone(&sink), context.clone());
    let request_total = TaggedMetricName::new("request-metrics", "request-total")
        .with_tag("listener", "PLAINTEXT")
        .with_description("Total requests handled");
    let queue_depth = TaggedMetricName::new("socket-server-metrics", "queue-depth")
        .with_tag("broker-id", "1")
        .with_description("Requests waiting in the socket server queue");
    let request_metric = LegacyMetric::Counter(metrics.requests.clone());
    let queue_metric = LegacyMetric::Gauge(metrics.queue_depth.clone());
    tagged.init([(&request_total, &request_metric), (&queue_depth, &queue_metric)]);

    // Registry-listener metrics reach their reporter through the legacy registry.
    let source = LegacyMetricsRegistry::new();
    source.register(
        QualifiedMetricName::compose("kafka.server", "BrokerTopicMetrics", "BytesInPerSec", [("topic", "orders")]),
        LegacyMetric::Meter(metrics.bytes_in.clone()),
    );
    source.register(
        QualifiedMetricName::compose("kafka.network", "RequestMetrics", "TotalTimeMs", [("request", "Produce")]),
        LegacyMetric::Timer(metrics.request_latency.clone()),
    );
    source.register(
        QualifiedMetricName::compose("kafka.log", "LogFlushStats", "BatchSize", []),
        LegacyMetric::Histogram(metrics.batch_size.clone()),
    );

    let qualified = Arc::new(QualifiedMetricsReporter::new(Arc::clone(&sink), context));
    let listener: Arc<dyn MetricsListener<QualifiedMetricName>> = qualified.clone();
    source.add_listener(Arc::clone(&listener));
    tracing::info!(
        tagged = tagged.registry().len(),
        qualified = qualified.registry().len(),
        "Reporters attached"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_ms.max(1)));
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick += 1;
                metrics.tick(tick);
                tracing::trace!(tick, "Updated demo metrics");
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    source.remove_listener(&listener);
    tagged.close();
    qualified.close();
    if let Err(e) = otel.shutdown() {
        tracing::warn!(error = %e, "Failed to shut down the metrics pipeline");
    }

    tracing::info!(ticks = tick, "Meterbridge shutdown complete");
    Ok(())
}

//! Reporters: the entry points a host metrics system talks to.
//!
//! [`TaggedMetricsReporter`] follows the tag-based reporter lifecycle
//! (`configure`, `init`, `metric_change`, `metric_removal`, `close`).
//! [`QualifiedMetricsReporter`] is a registry listener and is driven by
//! add/remove notifications. Both share the process-wide pipeline.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::descriptor::{
    QualifiedDescriptorBuilder, QualifiedMetricName, TaggedDescriptorBuilder, TaggedMetricName,
};
use crate::error::Result;
use crate::instrument::InstrumentSink;
use crate::legacy::{LegacyMetric, MetricsListener};
use crate::naming::NamingContext;
use crate::observability::pipeline::SingletonPipeline;
use crate::registry::InstrumentRegistry;

fn otel_sink<I, K, V>(pipeline: &SingletonPipeline, properties: I) -> Result<Arc<dyn InstrumentSink>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let config = PipelineConfig::from_properties(properties)?;
    let pipeline = pipeline.get_or_init(&config)?;
    Ok(Arc::new(pipeline.sink()))
}

/// Reports tag-based metrics.
pub struct TaggedMetricsReporter {
    registry: InstrumentRegistry<TaggedDescriptorBuilder>,
}

impl TaggedMetricsReporter {
    pub fn new(sink: Arc<dyn InstrumentSink>, context: NamingContext) -> Self {
        Self::with_builder(TaggedDescriptorBuilder::new(), sink, context)
    }

    pub fn with_builder(
        builder: TaggedDescriptorBuilder,
        sink: Arc<dyn InstrumentSink>,
        context: NamingContext,
    ) -> Self {
        Self {
            registry: InstrumentRegistry::new(builder, sink, context),
        }
    }

    /// Build a reporter on the shared pipeline described by the `otel.*`
    /// entries of `properties`. The naming context starts empty until
    /// [`context_change`](Self::context_change) is called.
    pub fn configure<I, K, V>(pipeline: &SingletonPipeline, properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sink = otel_sink(pipeline, properties)?;
        Ok(Self::new(sink, NamingContext::default()))
    }

    /// Rebuild the naming context from contextual labels. Metrics reported
    /// afterwards use the new context.
    pub fn context_change<L, K, V>(&self, labels: L)
    where
        L: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let context = NamingContext::from_labels(labels);
        tracing::debug!(namespace = context.namespace(), attributes = %context.attributes(), "Naming context changed");
        self.registry.set_context(context);
    }

    /// Report the metrics that exist when the reporter starts.
    pub fn init<'a>(&self, metrics: impl IntoIterator<Item = (&'a TaggedMetricName, &'a LegacyMetric)>) {
        for (id, metric) in metrics {
            self.registry.on_add(id, metric);
        }
    }

    pub fn metric_change(&self, id: &TaggedMetricName, metric: &LegacyMetric) {
        self.registry.on_add(id, metric);
    }

    pub fn metric_removal(&self, id: &TaggedMetricName) {
        self.registry.on_remove(id);
    }

    pub fn close(&self) {
        self.registry.close();
    }

    pub fn registry(&self) -> &InstrumentRegistry<TaggedDescriptorBuilder> {
        &self.registry
    }
}

/// Reports metrics of a registry-listener metrics library.
pub struct QualifiedMetricsReporter {
    registry: InstrumentRegistry<QualifiedDescriptorBuilder>,
}

impl QualifiedMetricsReporter {
    pub fn new(sink: Arc<dyn InstrumentSink>, context: NamingContext) -> Self {
        Self {
            registry: InstrumentRegistry::new(QualifiedDescriptorBuilder::new(), sink, context),
        }
    }

    /// Build a reporter on the shared pipeline described by the `otel.*`
    /// entries of `properties`.
    pub fn configure<I, K, V>(
        pipeline: &SingletonPipeline,
        properties: I,
        context: NamingContext,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sink = otel_sink(pipeline, properties)?;
        Ok(Self::new(sink, context))
    }

    pub fn close(&self) {
        self.registry.close();
    }

    pub fn registry(&self) -> &InstrumentRegistry<QualifiedDescriptorBuilder> {
        &self.registry
    }
}

impl MetricsListener<QualifiedMetricName> for QualifiedMetricsReporter {
    fn on_metric_added(&self, id: &QualifiedMetricName, metric: &LegacyMetric) {
        self.registry.on_add(id, metric);
    }

    fn on_metric_removed(&self, id: &QualifiedMetricName) {
        self.registry.on_remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::instrument::InMemorySink;
    use crate::legacy::ManualCounter;
    use crate::naming::context::NAMESPACE_KEY;

    #[test]
    fn test_tagged_lifecycle() {
        let sink = InMemorySink::new();
        let reporter = TaggedMetricsReporter::new(Arc::new(sink.clone()), NamingContext::default());
        reporter.context_change([(NAMESPACE_KEY, "kafka.producer"), ("kafka.client.id", "p1")]);

        let id = TaggedMetricName::new("producer-metrics", "record-send-total");
        let metric = LegacyMetric::Counter(Arc::new(ManualCounter::new()));
        reporter.init([(&id, &metric)]);

        let live = sink.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name(), "kafka.producer.recordSend.count");
        assert_eq!(live[0].attributes().get("clientId"), Some("p1"));

        reporter.metric_removal(&id);
        assert_eq!(sink.live_count(), 0);
        reporter.close();
        assert!(reporter.registry().is_closed());
    }

    #[test]
    fn test_configure_rejects_conflicting_properties() {
        let pipeline = SingletonPipeline::new();
        TaggedMetricsReporter::configure(&pipeline, [("otel.service.name", "broker")]).unwrap();

        let err = QualifiedMetricsReporter::configure(
            &pipeline,
            [("otel.service.name", "other")],
            NamingContext::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BridgeError::ConfigConflict { .. }));

        // Non-otel properties do not take part in the comparison.
        QualifiedMetricsReporter::configure(
            &pipeline,
            [("otel.service.name", "broker"), ("broker.id", "3")],
            NamingContext::default(),
        )
        .unwrap();
    }
}

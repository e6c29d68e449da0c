//! Test utilities shared by the integration tests.
//!
//! Provides:
//! - Registries and reporters wired to an in-memory sink
//! - Legacy metric fixtures

#![allow(dead_code)]

use std::sync::Arc;

use meterbridge::descriptor::{QualifiedDescriptorBuilder, TaggedDescriptorBuilder};
use meterbridge::instrument::{InMemorySink, Observation};
use meterbridge::legacy::{LegacyMetric, ManualCounter, ManualMeter, RateUnit, Rates};
use meterbridge::naming::context::NAMESPACE_KEY;
use meterbridge::naming::NamingContext;
use meterbridge::observability::tracing::init_test_tracing;
use meterbridge::registry::InstrumentRegistry;

/// Namespace used by every fixture context.
pub const NAMESPACE: &str = "kafka.server";

/// A naming context with the test namespace and a cluster id label.
pub fn context() -> NamingContext {
    NamingContext::from_labels([(NAMESPACE_KEY, NAMESPACE), ("kafka.cluster.id", "test-cluster")])
}

/// Test fixture pairing an in-memory sink with something that registers on it.
pub struct Harness<T> {
    pub sink: InMemorySink,
    pub subject: T,
}

impl Harness<InstrumentRegistry<TaggedDescriptorBuilder>> {
    /// A tag-based registry over a fresh sink.
    pub fn tagged() -> Self {
        init_test_tracing();
        let sink = InMemorySink::new();
        let subject = InstrumentRegistry::new(TaggedDescriptorBuilder::new(), Arc::new(sink.clone()), context());
        Self { sink, subject }
    }
}

impl Harness<InstrumentRegistry<QualifiedDescriptorBuilder>> {
    /// A registry-listener registry over a fresh sink.
    pub fn qualified() -> Self {
        init_test_tracing();
        let sink = InMemorySink::new();
        let subject =
            InstrumentRegistry::new(QualifiedDescriptorBuilder::new(), Arc::new(sink.clone()), context());
        Self { sink, subject }
    }
}

impl<T> Harness<T> {
    /// Sorted names of the live instruments.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sink.live().iter().map(|d| d.name().to_string()).collect();
        names.sort();
        names
    }

    /// First observation with the given instrument name.
    pub fn observed(&self, name: &str) -> Option<Observation> {
        self.sink.collect().into_iter().find(|o| o.name == name)
    }
}

/// A counter already holding `count`.
pub fn counter(count: u64) -> (Arc<ManualCounter>, LegacyMetric) {
    let counter = Arc::new(ManualCounter::new());
    counter.set(count);
    (counter.clone(), LegacyMetric::Counter(counter))
}

/// A meter holding `count` and the given mean and one-minute rates.
pub fn meter(count: u64, mean: f64, one_minute: f64) -> (Arc<ManualMeter>, LegacyMetric) {
    let meter = Arc::new(ManualMeter::new("requests", RateUnit::Seconds));
    meter.mark(count);
    meter.set_rates(Rates {
        mean,
        one_minute,
        five_minute: 0.0,
        fifteen_minute: 0.0,
    });
    (meter.clone(), LegacyMetric::Meter(meter))
}

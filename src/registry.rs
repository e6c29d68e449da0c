//! Instrument registry: the live instruments of every bridged legacy metric.
//!
//! Each identifier is either absent or registered with exactly one list of
//! instrument handles. Re-adding an identifier swaps in the new list before
//! the old one is closed, so collectors never see a gap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::descriptor::DescriptorBuilder;
use crate::dispatch::MetricDispatcher;
use crate::instrument::{InstrumentHandle, InstrumentSink};
use crate::legacy::{LegacyMetric, MetricsListener};
use crate::naming::NamingContext;

struct State<Id> {
    entries: HashMap<Id, Vec<Box<dyn InstrumentHandle>>>,
    closed: bool,
}

/// Bridges legacy metric lifecycle events into instrument registrations.
///
/// All mutations of the identifier map are serialised by one lock. Instrument
/// callbacks never take it; they read the legacy metric directly.
pub struct InstrumentRegistry<B: DescriptorBuilder> {
    builder: B,
    context: RwLock<Arc<NamingContext>>,
    dispatcher: MetricDispatcher,
    state: Mutex<State<B::Id>>,
}

impl<B: DescriptorBuilder> InstrumentRegistry<B> {
    pub fn new(builder: B, sink: Arc<dyn InstrumentSink>, context: NamingContext) -> Self {
        Self {
            builder,
            context: RwLock::new(Arc::new(context)),
            dispatcher: MetricDispatcher::new(sink),
            state: Mutex::new(State {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<B::Id>> {
        // Close callbacks run outside the lock, so a poisoned map is still
        // consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The naming context used for descriptors built from now on.
    pub fn context(&self) -> Arc<NamingContext> {
        let guard = self.context.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the naming context. Instruments already registered keep the
    /// names and attributes they were built with.
    pub fn set_context(&self, context: NamingContext) {
        let mut guard = self.context.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(context);
    }

    /// Register the instruments for `metric`, replacing any registered for `id`.
    pub fn on_add(&self, id: &B::Id, metric: &LegacyMetric) {
        let context = self.context();
        let descriptor = match self.builder.build(id, &context) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(metric = %id, error = %e, "Dropping metric with malformed identifier");
                return;
            }
        };

        let handles = self.dispatcher.dispatch(&descriptor, metric);
        tracing::trace!(
            metric = %id,
            kind = %metric.kind(),
            instruments = handles.len(),
            "Built instruments"
        );

        let displaced = {
            let mut state = self.state();
            if state.closed {
                drop(state);
                tracing::warn!(metric = %id, "Registry is closed, discarding instruments");
                close_all(handles);
                return;
            }
            state.entries.insert(id.clone(), handles)
        };

        match displaced {
            Some(old) => {
                tracing::trace!(metric = %id, "Replacing instruments");
                close_all(old);
            }
            None => tracing::trace!(metric = %id, "Adding instruments"),
        }
    }

    /// Close and forget the instruments registered for `id`, if any.
    pub fn on_remove(&self, id: &B::Id) {
        let removed = self.state().entries.remove(id);
        if let Some(handles) = removed {
            tracing::trace!(metric = %id, "Removing instruments");
            close_all(handles);
        }
    }

    /// Close every registered instrument. Later adds are discarded and later
    /// removes are no-ops.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.closed = true;
            state.entries.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(metrics = drained.len(), "Closing all instruments");
        }
        for (_, handles) in drained {
            close_all(handles);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of registered identifiers.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn contains(&self, id: &B::Id) -> bool {
        self.state().entries.contains_key(id)
    }

    /// Number of live instruments registered for `id`.
    pub fn instrument_count(&self, id: &B::Id) -> Option<usize> {
        self.state().entries.get(id).map(Vec::len)
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }
}

impl<B: DescriptorBuilder> MetricsListener<B::Id> for InstrumentRegistry<B> {
    fn on_metric_added(&self, id: &B::Id, metric: &LegacyMetric) {
        self.on_add(id, metric);
    }

    fn on_metric_removed(&self, id: &B::Id) {
        self.on_remove(id);
    }
}

impl<B: DescriptorBuilder> Drop for InstrumentRegistry<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Close every handle; failures are logged and do not stop the rest.
fn close_all(handles: Vec<Box<dyn InstrumentHandle>>) {
    for handle in handles {
        let name = handle.descriptor().to_string();
        if let Err(e) = handle.close() {
            tracing::warn!(instrument = %name, error = %e, "Error closing instrument");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TaggedDescriptorBuilder, TaggedMetricName};
    use crate::instrument::InMemorySink;
    use crate::legacy::{ManualCounter, ManualGauge};
    use crate::naming::context::NAMESPACE_KEY;

    fn registry() -> (InMemorySink, InstrumentRegistry<TaggedDescriptorBuilder>) {
        let sink = InMemorySink::new();
        let context = NamingContext::from_labels([(NAMESPACE_KEY, "kafka.server")]);
        let registry = InstrumentRegistry::new(TaggedDescriptorBuilder::new(), Arc::new(sink.clone()), context);
        (sink, registry)
    }

    fn counter() -> LegacyMetric {
        LegacyMetric::Counter(Arc::new(ManualCounter::new()))
    }

    #[test]
    fn test_add_then_remove() {
        let (sink, registry) = registry();
        let id = TaggedMetricName::new("kafka.server", "requests");

        registry.on_add(&id, &counter());
        assert!(registry.contains(&id));
        assert_eq!(registry.instrument_count(&id), Some(1));

        registry.on_remove(&id);
        assert!(registry.is_empty());
        assert_eq!(sink.live_count(), 0);
        assert_eq!(sink.close_attempts(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (sink, registry) = registry();
        registry.on_remove(&TaggedMetricName::new("g", "missing"));
        assert_eq!(sink.close_attempts(), 0);
    }

    #[test]
    fn test_gauge_without_value_registers_empty_entry() {
        let (sink, registry) = registry();
        let id = TaggedMetricName::new("kafka.server", "state");

        registry.on_add(&id, &LegacyMetric::Gauge(Arc::new(ManualGauge::new())));
        assert_eq!(registry.instrument_count(&id), Some(0));
        assert_eq!(sink.registered(), 0);
    }

    #[test]
    fn test_context_change_affects_new_descriptors_only() {
        let (sink, registry) = registry();
        registry.on_add(&TaggedMetricName::new("", "first"), &counter());

        registry.set_context(NamingContext::from_labels([(NAMESPACE_KEY, "kafka.controller")]));
        registry.on_add(&TaggedMetricName::new("", "second"), &counter());

        let mut names: Vec<_> = sink.live().iter().map(|d| d.name().to_string()).collect();
        names.sort();
        assert_eq!(names, ["kafka.controller.second.count", "kafka.server.first.count"]);
    }

    #[test]
    fn test_add_after_close_is_discarded() {
        let (sink, registry) = registry();
        registry.close();
        assert!(registry.is_closed());

        registry.on_add(&TaggedMetricName::new("kafka.server", "late"), &counter());
        assert!(registry.is_empty());
        assert_eq!(sink.live_count(), 0);
        assert_eq!(sink.close_attempts(), 1);
    }

    #[test]
    fn test_drop_closes_instruments() {
        let (sink, registry) = registry();
        registry.on_add(&TaggedMetricName::new("kafka.server", "a"), &counter());
        drop(registry);
        assert_eq!(sink.live_count(), 0);
    }
}

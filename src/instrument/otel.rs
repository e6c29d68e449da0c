//! OpenTelemetry implementation of [`InstrumentSink`].
//!
//! The SDK cannot unregister an observable instrument, so the sink registers
//! one SDK observable per instrument name and kind and keeps the readers
//! itself, one series per attribute set. The SDK callback reports the newest
//! live reader of every series. Closing a handle removes its reader; the
//! series is no longer observed and a delta reader stops exporting it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::metrics::{Meter, ObservableCounter, ObservableGauge};
use opentelemetry::KeyValue;

use super::{CounterReader, GaugeReader, InstrumentHandle, InstrumentKind, InstrumentSink};
use crate::descriptor::{Attributes, InstrumentDescriptor};
use crate::error::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps an exported count monotonic when a series' reader is replaced by
/// one that starts lower.
#[derive(Debug, Default)]
struct ResetCarry {
    last: u64,
    base: u64,
}

impl ResetCarry {
    fn apply(&mut self, raw: u64) -> u64 {
        if raw < self.last {
            self.base = self.base.saturating_add(self.last);
        }
        self.last = raw;
        self.base.saturating_add(raw)
    }
}

struct Series<R> {
    key_values: Vec<KeyValue>,
    readers: Vec<(u64, R)>,
    carry: ResetCarry,
}

/// Live readers of one SDK instrument, by attribute set.
struct ReaderTable<R> {
    series: Mutex<HashMap<Attributes, Series<R>>>,
}

impl<R> ReaderTable<R> {
    fn new() -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
        }
    }

    fn attach(&self, attributes: &Attributes, id: u64, reader: R) {
        lock(&self.series)
            .entry(attributes.clone())
            .or_insert_with(|| Series {
                key_values: attributes.to_key_values(),
                readers: Vec::new(),
                carry: ResetCarry::default(),
            })
            .readers
            .push((id, reader));
    }

    /// Remove one reader. Returns whether it was attached.
    fn detach(&self, attributes: &Attributes, id: u64) -> bool {
        let mut series = lock(&self.series);
        let Some(entry) = series.get_mut(attributes) else {
            return false;
        };
        let before = entry.readers.len();
        entry.readers.retain(|(reader_id, _)| *reader_id != id);
        entry.readers.len() != before
    }

    /// Visit the newest reader of every series that still has one.
    ///
    /// Series left without readers are dropped here, in the same collection
    /// the SDK stops seeing them, so a reset carry never outlives the SDK's
    /// own delta state for that series.
    fn observe(&self, mut visit: impl FnMut(&R, &mut ResetCarry, &[KeyValue])) {
        let mut series = lock(&self.series);
        series.retain(|_, s| !s.readers.is_empty());
        for s in series.values_mut() {
            if let Some((_, reader)) = s.readers.last() {
                visit(reader, &mut s.carry, &s.key_values);
            }
        }
    }

    fn live_readers(&self) -> usize {
        lock(&self.series).values().map(|s| s.readers.len()).sum()
    }
}

struct Registered<I, R> {
    table: Arc<ReaderTable<R>>,
    // Held so the SDK instrument lives as long as the sink.
    _instrument: I,
}

struct Shared {
    meter: Meter,
    counters: Mutex<HashMap<String, Registered<ObservableCounter<u64>, CounterReader>>>,
    gauges: Mutex<HashMap<String, Registered<ObservableGauge<f64>, GaugeReader>>>,
    next_id: AtomicU64,
}

/// Registers observable instruments on an OpenTelemetry [`Meter`].
///
/// Clones share one instrument table. The first registration of a name
/// decides its description.
#[derive(Clone)]
pub struct OtelInstrumentSink {
    shared: Arc<Shared>,
}

impl fmt::Debug for OtelInstrumentSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelInstrumentSink")
            .field("counters", &lock(&self.shared.counters).len())
            .field("gauges", &lock(&self.shared.gauges).len())
            .finish()
    }
}

impl OtelInstrumentSink {
    pub fn new(meter: Meter) -> Self {
        Self {
            shared: Arc::new(Shared {
                meter,
                counters: Mutex::new(HashMap::new()),
                gauges: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of SDK instruments registered so far.
    pub fn sdk_instruments(&self) -> usize {
        lock(&self.shared.counters).len() + lock(&self.shared.gauges).len()
    }

    /// Number of attached readers across all instruments.
    pub fn live_readers(&self) -> usize {
        let counters: usize = lock(&self.shared.counters)
            .values()
            .map(|r| r.table.live_readers())
            .sum();
        let gauges: usize = lock(&self.shared.gauges)
            .values()
            .map(|r| r.table.live_readers())
            .sum();
        counters + gauges
    }

    fn counter_table(&self, descriptor: &InstrumentDescriptor) -> Arc<ReaderTable<CounterReader>> {
        let mut counters = lock(&self.shared.counters);
        if let Some(registered) = counters.get(descriptor.name()) {
            return Arc::clone(&registered.table);
        }

        let table = Arc::new(ReaderTable::<CounterReader>::new());
        let callback_table = Arc::clone(&table);
        let mut builder = self
            .shared
            .meter
            .u64_observable_counter(descriptor.name().to_string())
            .with_callback(move |observer| {
                callback_table.observe(|read, carry, attributes| {
                    observer.observe(carry.apply(read()), attributes);
                });
            });
        if let Some(description) = descriptor.description() {
            builder = builder.with_description(description.to_string());
        }

        tracing::trace!(instrument = descriptor.name(), "Registering observable counter");
        counters.insert(
            descriptor.name().to_string(),
            Registered {
                table: Arc::clone(&table),
                _instrument: builder.init(),
            },
        );
        table
    }

    fn gauge_table(&self, descriptor: &InstrumentDescriptor) -> Arc<ReaderTable<GaugeReader>> {
        let mut gauges = lock(&self.shared.gauges);
        if let Some(registered) = gauges.get(descriptor.name()) {
            return Arc::clone(&registered.table);
        }

        let table = Arc::new(ReaderTable::<GaugeReader>::new());
        let callback_table = Arc::clone(&table);
        let mut builder = self
            .shared
            .meter
            .f64_observable_gauge(descriptor.name().to_string())
            .with_callback(move |observer| {
                callback_table.observe(|read, _, attributes| {
                    // An absent reading skips this tick.
                    if let Some(value) = read() {
                        observer.observe(value, attributes);
                    }
                });
            });
        if let Some(description) = descriptor.description() {
            builder = builder.with_description(description.to_string());
        }

        tracing::trace!(instrument = descriptor.name(), "Registering observable gauge");
        gauges.insert(
            descriptor.name().to_string(),
            Registered {
                table: Arc::clone(&table),
                _instrument: builder.init(),
            },
        );
        table
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl InstrumentSink for OtelInstrumentSink {
    fn observable_counter(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: CounterReader,
    ) -> Result<Box<dyn InstrumentHandle>> {
        let table = self.counter_table(descriptor);
        let id = self.next_id();
        table.attach(descriptor.attributes(), id, reader);
        Ok(Box::new(OtelHandle {
            descriptor: descriptor.clone(),
            attachment: Attachment::Counter(table),
            id,
        }))
    }

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: GaugeReader,
    ) -> Result<Box<dyn InstrumentHandle>> {
        let table = self.gauge_table(descriptor);
        let id = self.next_id();
        table.attach(descriptor.attributes(), id, reader);
        Ok(Box::new(OtelHandle {
            descriptor: descriptor.clone(),
            attachment: Attachment::Gauge(table),
            id,
        }))
    }
}

enum Attachment {
    Counter(Arc<ReaderTable<CounterReader>>),
    Gauge(Arc<ReaderTable<GaugeReader>>),
}

struct OtelHandle {
    descriptor: InstrumentDescriptor,
    attachment: Attachment,
    id: u64,
}

impl OtelHandle {
    fn detach(&self) -> bool {
        let attributes = self.descriptor.attributes();
        match &self.attachment {
            Attachment::Counter(table) => table.detach(attributes, self.id),
            Attachment::Gauge(table) => table.detach(attributes, self.id),
        }
    }
}

impl fmt::Debug for OtelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelHandle")
            .field("descriptor", &self.descriptor)
            .field("kind", &self.kind())
            .field("id", &self.id)
            .finish()
    }
}

impl InstrumentHandle for OtelHandle {
    fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    fn kind(&self) -> InstrumentKind {
        match self.attachment {
            Attachment::Counter(_) => InstrumentKind::Counter,
            Attachment::Gauge(_) => InstrumentKind::Gauge,
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        if !self.detach() {
            tracing::trace!(instrument = %self.descriptor, "instrument already detached");
        }
        Ok(())
    }
}

impl Drop for OtelHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SuffixPolicy;
    use crate::naming::NameManipulator;
    use crate::observability::pipeline::SharedReader;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::data::{Gauge, Sum};
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    struct Fixture {
        reader: SharedReader,
        sink: OtelInstrumentSink,
        _provider: SdkMeterProvider,
    }

    fn fixture() -> Fixture {
        let reader = SharedReader::new();
        let provider = SdkMeterProvider::builder().with_reader(reader.clone()).build();
        let sink = OtelInstrumentSink::new(provider.meter("meterbridge-test"));
        Fixture {
            reader,
            sink,
            _provider: provider,
        }
    }

    /// Values of every data point exported for `name` in one collection.
    fn collect(reader: &SharedReader, name: &str) -> Vec<f64> {
        let metrics = reader.read().unwrap();
        let mut values = Vec::new();
        for metric in metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
        {
            let data = metric.data.as_any();
            if let Some(sum) = data.downcast_ref::<Sum<u64>>() {
                values.extend(sum.data_points.iter().map(|p| p.value as f64));
            } else if let Some(gauge) = data.downcast_ref::<Gauge<f64>>() {
                values.extend(gauge.data_points.iter().map(|p| p.value));
            }
        }
        values
    }

    fn descriptor(name: &str, topic: &str) -> InstrumentDescriptor {
        let attributes: Attributes = [("topic", topic)].into_iter().collect();
        InstrumentDescriptor::new(
            name,
            attributes,
            NameManipulator::identity(),
            SuffixPolicy::Append,
        )
        .with_description("test instrument")
    }

    fn counter_reader(value: &Arc<AtomicU64>) -> CounterReader {
        let value = Arc::clone(value);
        Box::new(move || value.load(Ordering::SeqCst))
    }

    #[test]
    fn test_counter_reads_lazily_and_stops_after_close() {
        let f = fixture();
        let bytes = Arc::new(AtomicU64::new(42));
        let handle = f
            .sink
            .observable_counter(&descriptor("kafka.server.bytesIn.count", "orders"), counter_reader(&bytes))
            .unwrap();
        assert_eq!(handle.kind(), InstrumentKind::Counter);

        assert_eq!(collect(&f.reader, "kafka.server.bytesIn.count"), [42.0]);

        // Read at collection time; delta readers export the increase.
        bytes.store(50, Ordering::SeqCst);
        assert_eq!(collect(&f.reader, "kafka.server.bytesIn.count"), [8.0]);

        handle.close().unwrap();
        assert!(collect(&f.reader, "kafka.server.bytesIn.count").is_empty());
        assert!(collect(&f.reader, "kafka.server.bytesIn.count").is_empty());
    }

    #[test]
    fn test_gauge_reads_lazily_and_stops_after_close() {
        let f = fixture();
        let lag = Arc::new(AtomicU64::new(3));
        let reader_lag = Arc::clone(&lag);
        let handle = f
            .sink
            .observable_gauge(
                &descriptor("kafka.server.lag", "orders"),
                Box::new(move || Some(reader_lag.load(Ordering::SeqCst) as f64)),
            )
            .unwrap();
        assert_eq!(Arc::strong_count(&lag), 2);

        assert_eq!(collect(&f.reader, "kafka.server.lag"), [3.0]);
        lag.store(7, Ordering::SeqCst);
        assert_eq!(collect(&f.reader, "kafka.server.lag"), [7.0]);

        handle.close().unwrap();
        assert!(collect(&f.reader, "kafka.server.lag").is_empty());
        // The legacy metric is no longer referenced by the instrument.
        assert_eq!(Arc::strong_count(&lag), 1);
    }

    #[test]
    fn test_dropped_handle_detaches() {
        let f = fixture();
        let handle = f
            .sink
            .observable_gauge(&descriptor("kafka.server.lag", "orders"), Box::new(|| Some(1.0)))
            .unwrap();
        drop(handle);
        assert_eq!(f.sink.live_readers(), 0);
        assert!(collect(&f.reader, "kafka.server.lag").is_empty());
    }

    #[test]
    fn test_churn_reuses_sdk_instrument() {
        let f = fixture();
        for topic in 0..20 {
            let handle = f
                .sink
                .observable_gauge(&descriptor("kafka.log.size", &topic.to_string()), Box::new(|| Some(1.0)))
                .unwrap();
            handle.close().unwrap();
        }
        let live = f
            .sink
            .observable_gauge(&descriptor("kafka.log.size", "orders"), Box::new(|| Some(2.0)))
            .unwrap();

        assert_eq!(f.sink.sdk_instruments(), 1);
        assert_eq!(f.sink.live_readers(), 1);
        assert_eq!(collect(&f.reader, "kafka.log.size"), [2.0]);
        live.close().unwrap();
    }

    #[test]
    fn test_series_per_attribute_set() {
        let f = fixture();
        let orders = f
            .sink
            .observable_gauge(&descriptor("kafka.log.size", "orders"), Box::new(|| Some(1.0)))
            .unwrap();
        let payments = f
            .sink
            .observable_gauge(&descriptor("kafka.log.size", "payments"), Box::new(|| Some(2.0)))
            .unwrap();

        let mut values = collect(&f.reader, "kafka.log.size");
        values.sort_by(f64::total_cmp);
        assert_eq!(values, [1.0, 2.0]);

        orders.close().unwrap();
        assert_eq!(collect(&f.reader, "kafka.log.size"), [2.0]);
        payments.close().unwrap();
    }

    #[test]
    fn test_replacement_with_lower_count_stays_monotonic() {
        let f = fixture();
        let name = "kafka.server.requests.count";
        let first = Arc::new(AtomicU64::new(10));
        let old = f
            .sink
            .observable_counter(&descriptor(name, "orders"), counter_reader(&first))
            .unwrap();
        assert_eq!(collect(&f.reader, name), [10.0]);

        // New reader installed before the old one is closed.
        let second = Arc::new(AtomicU64::new(3));
        let new = f
            .sink
            .observable_counter(&descriptor(name, "orders"), counter_reader(&second))
            .unwrap();
        old.close().unwrap();

        assert_eq!(collect(&f.reader, name), [3.0]);
        second.store(5, Ordering::SeqCst);
        assert_eq!(collect(&f.reader, name), [2.0]);
        new.close().unwrap();
    }

    #[test]
    fn test_reset_carry() {
        let mut carry = ResetCarry::default();
        assert_eq!(carry.apply(10), 10);
        assert_eq!(carry.apply(12), 12);
        assert_eq!(carry.apply(2), 14);
        assert_eq!(carry.apply(5), 17);
    }
}

//! Maps one legacy metric onto the set of instruments that represent it.
//!
//! | kind      | instruments                                              |
//! |-----------|----------------------------------------------------------|
//! | counter   | `.count` counter                                         |
//! | gauge     | one gauge under the base name, if the value is numeric   |
//! | meter     | `.count` counter, mean-rate gauge, three windowed gauges |
//! | histogram | `.count` counter, statistics, quantiles                  |
//! | timer     | meter instruments, statistics, quantiles                 |
//!
//! Every reader holds a clone of the metric's `Arc` and reads the live value
//! only when the sink invokes it.

use std::sync::Arc;

use crate::descriptor::InstrumentDescriptor;
use crate::instrument::{CounterReader, GaugeReader, InstrumentHandle, InstrumentSink};
use crate::legacy::{
    Counting, GaugeSource, LegacyMetric, Metered, RateWindow, Sampling, Summarizable,
};

/// Quantiles exported for every sampled distribution.
pub const QUANTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999];

pub const EVENT_TYPE_ATTRIBUTE: &str = "eventType";
pub const RATE_UNIT_ATTRIBUTE: &str = "rateUnit";
pub const RATE_WINDOW_ATTRIBUTE: &str = "rateWindow";
pub const PERCENTILE_ATTRIBUTE: &str = "percentile";

const COUNT_SUFFIX: &str = "count";

/// A summary statistic exported as its own gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Max,
    Min,
    Mean,
    Sum,
    StdDev,
}

impl Statistic {
    pub const ALL: [Statistic; 5] = [
        Statistic::Max,
        Statistic::Min,
        Statistic::Mean,
        Statistic::Sum,
        Statistic::StdDev,
    ];

    /// Name suffix, before case transformation.
    pub fn suffix(self) -> &'static str {
        match self {
            Statistic::Max => "max",
            Statistic::Min => "min",
            Statistic::Mean => "mean",
            Statistic::Sum => "sum",
            Statistic::StdDev => "stdDev",
        }
    }

    pub fn read<S: Summarizable + ?Sized>(self, source: &S) -> f64 {
        match self {
            Statistic::Max => source.max(),
            Statistic::Min => source.min(),
            Statistic::Mean => source.mean(),
            Statistic::Sum => source.sum(),
            Statistic::StdDev => source.std_dev(),
        }
    }
}

/// Registers the instruments for one legacy metric on a sink.
#[derive(Clone)]
pub struct MetricDispatcher {
    sink: Arc<dyn InstrumentSink>,
}

impl MetricDispatcher {
    pub fn new(sink: Arc<dyn InstrumentSink>) -> Self {
        Self { sink }
    }

    /// Register every instrument for `metric` under `descriptor`.
    ///
    /// Instruments that fail to register are logged and left out; the rest
    /// are still returned.
    pub fn dispatch(
        &self,
        descriptor: &InstrumentDescriptor,
        metric: &LegacyMetric,
    ) -> Vec<Box<dyn InstrumentHandle>> {
        let mut handles = Vec::new();
        match metric {
            LegacyMetric::Timer(timer) => {
                self.metered(&mut handles, descriptor, timer);
                self.summarizable(&mut handles, descriptor, timer);
                self.sampling(&mut handles, descriptor, timer);
            }
            LegacyMetric::Meter(meter) => {
                self.metered(&mut handles, descriptor, meter);
            }
            LegacyMetric::Histogram(histogram) => {
                self.count(&mut handles, &descriptor.with_suffix(COUNT_SUFFIX), histogram);
                self.summarizable(&mut handles, descriptor, histogram);
                self.sampling(&mut handles, descriptor, histogram);
            }
            LegacyMetric::Counter(counter) => {
                self.count(&mut handles, &descriptor.with_suffix(COUNT_SUFFIX), counter);
            }
            LegacyMetric::Gauge(gauge) => {
                self.gauge(&mut handles, descriptor, gauge);
            }
        }
        handles
    }

    fn count<M: Counting + ?Sized + 'static>(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        metric: &Arc<M>,
    ) {
        let metric = Arc::clone(metric);
        let reader: CounterReader = Box::new(move || metric.count());
        self.push(handles, descriptor, self.sink.observable_counter(descriptor, reader));
    }

    fn metered<M: Metered + ?Sized + 'static>(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        metric: &Arc<M>,
    ) {
        let metered = descriptor.with_attribute(|attributes| {
            attributes
                .insert(EVENT_TYPE_ATTRIBUTE, metric.event_type())
                .insert(RATE_UNIT_ATTRIBUTE, metric.rate_unit().as_str());
        });

        self.count(handles, &metered.with_suffix(COUNT_SUFFIX), metric);

        let mean = Arc::clone(metric);
        self.observe_gauge(handles, &metered, Box::new(move || Some(mean.mean_rate())));

        for window in RateWindow::ALL {
            let windowed = metered.with_attribute(|attributes| {
                attributes.insert(RATE_WINDOW_ATTRIBUTE, window.iso8601());
            });
            let metric = Arc::clone(metric);
            self.observe_gauge(handles, &windowed, Box::new(move || Some(window.rate(&*metric))));
        }
    }

    fn summarizable<M: Summarizable + ?Sized + 'static>(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        metric: &Arc<M>,
    ) {
        for statistic in Statistic::ALL {
            let metric = Arc::clone(metric);
            self.observe_gauge(
                handles,
                &descriptor.with_suffix(statistic.suffix()),
                Box::new(move || Some(statistic.read(&*metric))),
            );
        }
    }

    fn sampling<M: Sampling + ?Sized + 'static>(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        metric: &Arc<M>,
    ) {
        for quantile in QUANTILES {
            let percentile = descriptor.with_attribute(|attributes| {
                attributes.insert(PERCENTILE_ATTRIBUTE, quantile.to_string());
            });
            let metric = Arc::clone(metric);
            self.observe_gauge(
                handles,
                &percentile,
                Box::new(move || Some(metric.snapshot().value(quantile))),
            );
        }
    }

    fn gauge(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        gauge: &Arc<dyn GaugeSource>,
    ) {
        match gauge.value() {
            None => {
                tracing::trace!(
                    instrument = %descriptor,
                    "Skipping gauge without a value"
                );
            }
            Some(reading) if reading.as_f64().is_none() => {
                tracing::trace!(
                    instrument = %descriptor,
                    value_type = reading.type_name(),
                    "Skipping gauge with non-numeric value"
                );
            }
            Some(_) => {
                let gauge = Arc::clone(gauge);
                let reader: GaugeReader = Box::new(move || gauge.value().and_then(|v| v.as_f64()));
                self.observe_gauge(handles, descriptor, reader);
            }
        }
    }

    fn observe_gauge(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        reader: GaugeReader,
    ) {
        self.push(handles, descriptor, self.sink.observable_gauge(descriptor, reader));
    }

    fn push(
        &self,
        handles: &mut Vec<Box<dyn InstrumentHandle>>,
        descriptor: &InstrumentDescriptor,
        registered: crate::error::Result<Box<dyn InstrumentHandle>>,
    ) {
        match registered {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                tracing::warn!(instrument = %descriptor, error = %e, "Failed to register instrument");
            }
        }
    }
}

//! Legacy metrics whose values are pushed by their producer.
//!
//! None of these compute statistics; a producer that already has rates or
//! summaries (for example, read from another process) publishes them here
//! and the bridge reads them back at collection time. All types are safe to
//! read while being updated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{Counting, GaugeReading, GaugeSource, Metered, RateUnit, Sampling, Snapshot, Summarizable};

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

/// A counter incremented by its producer.
#[derive(Debug, Default)]
pub struct ManualCounter {
    count: AtomicU64,
}

impl ManualCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, count: u64) {
        self.count.store(count, Ordering::Relaxed);
    }
}

impl Counting for ManualCounter {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// A gauge holding the last value set; starts without a reading.
#[derive(Debug, Default)]
pub struct ManualGauge {
    value: RwLock<Option<GaugeReading>>,
}

impl ManualGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<GaugeReading>) -> Self {
        Self {
            value: RwLock::new(Some(value.into())),
        }
    }

    pub fn set(&self, value: impl Into<GaugeReading>) {
        write(&self.value, Some(value.into()));
    }

    pub fn clear(&self) {
        write(&self.value, None);
    }
}

impl GaugeSource for ManualGauge {
    fn value(&self) -> Option<GaugeReading> {
        read(&self.value)
    }
}

/// Rates published by a meter's producer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub mean: f64,
    pub one_minute: f64,
    pub five_minute: f64,
    pub fifteen_minute: f64,
}

/// A meter: a count plus producer-supplied rates.
#[derive(Debug)]
pub struct ManualMeter {
    count: ManualCounter,
    rates: RwLock<Rates>,
    event_type: String,
    rate_unit: RateUnit,
}

impl ManualMeter {
    pub fn new(event_type: impl Into<String>, rate_unit: RateUnit) -> Self {
        Self {
            count: ManualCounter::new(),
            rates: RwLock::new(Rates::default()),
            event_type: event_type.into(),
            rate_unit,
        }
    }

    pub fn mark(&self, n: u64) {
        self.count.add(n);
    }

    pub fn set_rates(&self, rates: Rates) {
        write(&self.rates, rates);
    }

    pub fn rates(&self) -> Rates {
        read(&self.rates)
    }
}

impl Counting for ManualMeter {
    fn count(&self) -> u64 {
        self.count.count()
    }
}

impl Metered for ManualMeter {
    fn mean_rate(&self) -> f64 {
        self.rates().mean
    }

    fn one_minute_rate(&self) -> f64 {
        self.rates().one_minute
    }

    fn five_minute_rate(&self) -> f64 {
        self.rates().five_minute
    }

    fn fifteen_minute_rate(&self) -> f64 {
        self.rates().fifteen_minute
    }

    fn event_type(&self) -> String {
        self.event_type.clone()
    }

    fn rate_unit(&self) -> RateUnit {
        self.rate_unit
    }
}

/// Summary statistics published by a distribution's producer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub sum: f64,
    pub std_dev: f64,
}

#[derive(Debug, Default)]
struct Distribution {
    summary: RwLock<Summary>,
    samples: RwLock<Snapshot>,
}

impl Distribution {
    fn summary(&self) -> Summary {
        read(&self.summary)
    }
}

/// A histogram: a count, a summary and a sample of recorded values.
#[derive(Debug, Default)]
pub struct ManualHistogram {
    count: ManualCounter,
    distribution: Distribution,
}

impl ManualHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, count: u64) {
        self.count.set(count);
    }

    pub fn set_summary(&self, summary: Summary) {
        write(&self.distribution.summary, summary);
    }

    pub fn set_samples(&self, samples: Vec<f64>) {
        write(&self.distribution.samples, Snapshot::new(samples));
    }
}

impl Counting for ManualHistogram {
    fn count(&self) -> u64 {
        self.count.count()
    }
}

impl Summarizable for ManualHistogram {
    fn max(&self) -> f64 {
        self.distribution.summary().max
    }

    fn min(&self) -> f64 {
        self.distribution.summary().min
    }

    fn mean(&self) -> f64 {
        self.distribution.summary().mean
    }

    fn sum(&self) -> f64 {
        self.distribution.summary().sum
    }

    fn std_dev(&self) -> f64 {
        self.distribution.summary().std_dev
    }
}

impl Sampling for ManualHistogram {
    fn snapshot(&self) -> Snapshot {
        read(&self.distribution.samples)
    }
}

/// A timer: a meter over a distribution of durations.
#[derive(Debug)]
pub struct ManualTimer {
    meter: ManualMeter,
    distribution: Distribution,
}

impl ManualTimer {
    pub fn new(rate_unit: RateUnit) -> Self {
        Self {
            meter: ManualMeter::new("calls", rate_unit),
            distribution: Distribution::default(),
        }
    }

    pub fn meter(&self) -> &ManualMeter {
        &self.meter
    }

    pub fn set_summary(&self, summary: Summary) {
        write(&self.distribution.summary, summary);
    }

    pub fn set_samples(&self, samples: Vec<f64>) {
        write(&self.distribution.samples, Snapshot::new(samples));
    }
}

impl Counting for ManualTimer {
    fn count(&self) -> u64 {
        self.meter.count()
    }
}

impl Metered for ManualTimer {
    fn mean_rate(&self) -> f64 {
        self.meter.mean_rate()
    }

    fn one_minute_rate(&self) -> f64 {
        self.meter.one_minute_rate()
    }

    fn five_minute_rate(&self) -> f64 {
        self.meter.five_minute_rate()
    }

    fn fifteen_minute_rate(&self) -> f64 {
        self.meter.fifteen_minute_rate()
    }

    fn event_type(&self) -> String {
        self.meter.event_type()
    }

    fn rate_unit(&self) -> RateUnit {
        self.meter.rate_unit()
    }
}

impl Summarizable for ManualTimer {
    fn max(&self) -> f64 {
        self.distribution.summary().max
    }

    fn min(&self) -> f64 {
        self.distribution.summary().min
    }

    fn mean(&self) -> f64 {
        self.distribution.summary().mean
    }

    fn sum(&self) -> f64 {
        self.distribution.summary().sum
    }

    fn std_dev(&self) -> f64 {
        self.distribution.summary().std_dev
    }
}

impl Sampling for ManualTimer {
    fn snapshot(&self) -> Snapshot {
        read(&self.distribution.samples)
    }
}

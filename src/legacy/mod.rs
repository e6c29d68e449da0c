//! The legacy metric model consumed by the bridge.
//!
//! A legacy metric is one of a closed set of kinds. Each kind holds a shared
//! handle to the live metric object exposing the capabilities that kind is
//! made of, so instrument callbacks can read current values at collection
//! time.
//!
//! Implementations must tolerate concurrent reads while their producer
//! updates them; the bridge never synchronises access to them.

pub mod manual;
pub mod source;

pub use manual::{ManualCounter, ManualGauge, ManualHistogram, ManualMeter, ManualTimer, Rates, Summary};
pub use source::LegacyMetricsRegistry;

use std::fmt;
use std::sync::Arc;

/// A monotonically increasing count.
pub trait Counting: Send + Sync {
    fn count(&self) -> u64;
}

/// Time unit rates are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl RateUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            RateUnit::Nanoseconds => "nanoseconds",
            RateUnit::Microseconds => "microseconds",
            RateUnit::Milliseconds => "milliseconds",
            RateUnit::Seconds => "seconds",
            RateUnit::Minutes => "minutes",
            RateUnit::Hours => "hours",
            RateUnit::Days => "days",
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A count plus mean and moving-window rates.
pub trait Metered: Counting {
    fn mean_rate(&self) -> f64;
    fn one_minute_rate(&self) -> f64;
    fn five_minute_rate(&self) -> f64;
    fn fifteen_minute_rate(&self) -> f64;
    /// What is being counted, e.g. `requests`.
    fn event_type(&self) -> String;
    fn rate_unit(&self) -> RateUnit;
}

/// Moving-average windows exposed by [`Metered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl RateWindow {
    pub const ALL: [RateWindow; 3] = [
        RateWindow::OneMinute,
        RateWindow::FiveMinutes,
        RateWindow::FifteenMinutes,
    ];

    /// The window as an ISO-8601 duration.
    pub fn iso8601(self) -> &'static str {
        match self {
            RateWindow::OneMinute => "PT1M",
            RateWindow::FiveMinutes => "PT5M",
            RateWindow::FifteenMinutes => "PT15M",
        }
    }

    /// Read this window's rate from `metered`.
    pub fn rate<M: Metered + ?Sized>(self, metered: &M) -> f64 {
        match self {
            RateWindow::OneMinute => metered.one_minute_rate(),
            RateWindow::FiveMinutes => metered.five_minute_rate(),
            RateWindow::FifteenMinutes => metered.fifteen_minute_rate(),
        }
    }
}

/// Summary statistics of a distribution.
pub trait Summarizable: Send + Sync {
    fn max(&self) -> f64;
    fn min(&self) -> f64;
    fn mean(&self) -> f64;
    fn sum(&self) -> f64;
    fn std_dev(&self) -> f64;
}

/// A point-in-time sample of a distribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: Vec<f64>,
}

impl Snapshot {
    pub fn new(mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        Self { values }
    }

    /// The value at `quantile` (0.0..=1.0), interpolating between samples.
    ///
    /// An empty snapshot reads as 0; a quantile outside the unit interval
    /// is clamped to it.
    pub fn value(&self, quantile: f64) -> f64 {
        let len = self.values.len();
        if len == 0 {
            return 0.0;
        }
        let pos = quantile.clamp(0.0, 1.0) * (len as f64 + 1.0);
        if pos < 1.0 {
            return self.values[0];
        }
        if pos >= len as f64 {
            return self.values[len - 1];
        }
        let index = pos as usize;
        let lower = self.values[index - 1];
        let upper = self.values[index];
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A distribution that can be sampled for quantiles.
pub trait Sampling: Send + Sync {
    fn snapshot(&self) -> Snapshot;
}

/// A distribution of values with a count.
pub trait HistogramSource: Counting + Summarizable + Sampling {}

impl<T: Counting + Summarizable + Sampling + ?Sized> HistogramSource for T {}

/// A meter over a distribution of durations.
pub trait TimerSource: Metered + Summarizable + Sampling {}

impl<T: Metered + Summarizable + Sampling + ?Sized> TimerSource for T {}

/// The current value of a gauge, which may be of any type.
#[derive(Debug, Clone, PartialEq)]
pub enum GaugeReading {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl GaugeReading {
    /// Numeric readings as `f64`; `None` for anything else.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GaugeReading::Integer(v) => Some(*v as f64),
            GaugeReading::Float(v) => Some(*v),
            GaugeReading::Boolean(_) | GaugeReading::Text(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            GaugeReading::Integer(_) => "integer",
            GaugeReading::Float(_) => "float",
            GaugeReading::Boolean(_) => "boolean",
            GaugeReading::Text(_) => "text",
        }
    }
}

impl From<i64> for GaugeReading {
    fn from(value: i64) -> Self {
        GaugeReading::Integer(value)
    }
}

impl From<f64> for GaugeReading {
    fn from(value: f64) -> Self {
        GaugeReading::Float(value)
    }
}

impl From<bool> for GaugeReading {
    fn from(value: bool) -> Self {
        GaugeReading::Boolean(value)
    }
}

impl From<&str> for GaugeReading {
    fn from(value: &str) -> Self {
        GaugeReading::Text(value.to_string())
    }
}

impl From<String> for GaugeReading {
    fn from(value: String) -> Self {
        GaugeReading::Text(value)
    }
}

/// A single arbitrary value, absent when the gauge has no reading.
pub trait GaugeSource: Send + Sync {
    fn value(&self) -> Option<GaugeReading>;
}

impl<F> GaugeSource for F
where
    F: Fn() -> Option<GaugeReading> + Send + Sync,
{
    fn value(&self) -> Option<GaugeReading> {
        self()
    }
}

/// Kind of a legacy metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Meter,
    Histogram,
    Timer,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Meter => "meter",
            MetricKind::Histogram => "histogram",
            MetricKind::Timer => "timer",
        };
        f.write_str(kind)
    }
}

/// A live legacy metric, tagged by kind.
#[derive(Clone)]
pub enum LegacyMetric {
    Counter(Arc<dyn Counting>),
    Gauge(Arc<dyn GaugeSource>),
    Meter(Arc<dyn Metered>),
    Histogram(Arc<dyn HistogramSource>),
    Timer(Arc<dyn TimerSource>),
}

impl LegacyMetric {
    pub fn kind(&self) -> MetricKind {
        match self {
            LegacyMetric::Counter(_) => MetricKind::Counter,
            LegacyMetric::Gauge(_) => MetricKind::Gauge,
            LegacyMetric::Meter(_) => MetricKind::Meter,
            LegacyMetric::Histogram(_) => MetricKind::Histogram,
            LegacyMetric::Timer(_) => MetricKind::Timer,
        }
    }
}

impl fmt::Debug for LegacyMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LegacyMetric").field(&self.kind()).finish()
    }
}

/// Receives legacy metric lifecycle notifications.
pub trait MetricsListener<Id>: Send + Sync {
    /// A metric was registered, possibly replacing one with the same id.
    fn on_metric_added(&self, id: &Id, metric: &LegacyMetric);

    fn on_metric_removed(&self, id: &Id);
}

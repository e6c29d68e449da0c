//! The boundary between the bridge and whatever records instruments.
//!
//! A sink registers asynchronous (observable) instruments whose values are
//! pulled from a reader closure at collection time. Registration returns an
//! [`InstrumentHandle`] that must be closed exactly once; `close` consumes
//! the handle so a second close cannot be expressed.

pub mod memory;
pub mod otel;

pub use memory::{InMemorySink, Observation};
pub use otel::OtelInstrumentSink;

use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::descriptor::InstrumentDescriptor;
use crate::error::Result;

/// Reads the current value of a monotonically increasing counter.
pub type CounterReader = Box<dyn Fn() -> u64 + Send + Sync>;

/// Reads the current value of a gauge; `None` skips the collection tick.
pub type GaugeReader = Box<dyn Fn() -> Option<f64> + Send + Sync>;

/// Kind of instrument a sink registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// Observable monotonic counter (`u64`).
    Counter,
    /// Observable gauge (`f64`).
    Gauge,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Counter => f.write_str("counter"),
            InstrumentKind::Gauge => f.write_str("gauge"),
        }
    }
}

/// A registered instrument.
pub trait InstrumentHandle: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &InstrumentDescriptor;

    fn kind(&self) -> InstrumentKind;

    /// Unregister the instrument. After this returns, successfully or not,
    /// the handle is gone.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Registers observable instruments.
pub trait InstrumentSink: Send + Sync {
    fn observable_counter(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: CounterReader,
    ) -> Result<Box<dyn InstrumentHandle>>;

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: GaugeReader,
    ) -> Result<Box<dyn InstrumentHandle>>;
}

/// A reader shared between an instrument callback and its handle.
///
/// Clearing the slot detaches the callback from the legacy metric: later
/// collections observe nothing and the metric is no longer kept alive.
pub(crate) struct ReaderSlot<R> {
    reader: RwLock<Option<R>>,
}

impl<R> ReaderSlot<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: RwLock::new(Some(reader)),
        }
    }

    /// Run `f` against the reader if it is still attached.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&R) -> T) -> Option<T> {
        let guard = self.reader.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }

    /// Detach the reader. Returns whether one was attached.
    pub(crate) fn clear(&self) -> bool {
        let mut guard = self.reader.write().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }

    pub(crate) fn is_attached(&self) -> bool {
        let guard = self.reader.read().unwrap_or_else(PoisonError::into_inner);
        guard.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_slot_clear() {
        let slot = ReaderSlot::new(Box::new(|| 5_u64) as CounterReader);
        assert_eq!(slot.with(|read| read()), Some(5));
        assert!(slot.is_attached());

        assert!(slot.clear());
        assert!(!slot.clear());
        assert_eq!(slot.with(|read| read()), None);
    }
}

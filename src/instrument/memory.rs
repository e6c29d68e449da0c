//! In-memory [`InstrumentSink`] for tests and dry runs.
//!
//! Nothing is exported. `collect` plays the role of a metric reader and
//! invokes every live reader once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{
    CounterReader, GaugeReader, InstrumentHandle, InstrumentKind, InstrumentSink, ReaderSlot,
};
use crate::descriptor::{Attributes, InstrumentDescriptor};
use crate::error::{BridgeError, Result};

/// One value produced by a collection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: String,
    pub kind: InstrumentKind,
    pub attributes: Attributes,
    pub value: f64,
}

enum Reader {
    Counter(ReaderSlot<CounterReader>),
    Gauge(ReaderSlot<GaugeReader>),
}

impl Reader {
    fn observe(&self) -> Option<f64> {
        match self {
            Reader::Counter(slot) => slot.with(|read| read() as f64),
            Reader::Gauge(slot) => slot.with(|read| read()).flatten(),
        }
    }

    fn clear(&self) -> bool {
        match self {
            Reader::Counter(slot) => slot.clear(),
            Reader::Gauge(slot) => slot.clear(),
        }
    }

    fn is_attached(&self) -> bool {
        match self {
            Reader::Counter(slot) => slot.is_attached(),
            Reader::Gauge(slot) => slot.is_attached(),
        }
    }

    fn kind(&self) -> InstrumentKind {
        match self {
            Reader::Counter(_) => InstrumentKind::Counter,
            Reader::Gauge(_) => InstrumentKind::Gauge,
        }
    }
}

struct Registration {
    descriptor: InstrumentDescriptor,
    reader: Arc<Reader>,
}

#[derive(Default)]
struct Shared {
    registrations: Mutex<Vec<Registration>>,
    fail_closes: AtomicBool,
    close_attempts: AtomicU64,
}

impl Shared {
    fn registrations(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records every registration and close; cheap to clone, clones share state.
#[derive(Clone, Default)]
pub struct InMemorySink {
    shared: Arc<Shared>,
}

impl fmt::Debug for InMemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySink")
            .field("live", &self.live_count())
            .field("close_attempts", &self.close_attempts())
            .finish()
    }
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `close` fail. A failed close leaves the reader
    /// attached, as a real backend would keep a callback it failed to drop.
    pub fn fail_closes(&self, fail: bool) {
        self.shared.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Invoke every live reader once. Gauges without a reading are skipped.
    pub fn collect(&self) -> Vec<Observation> {
        // Snapshot first so readers run without the registration lock held.
        let live: Vec<(InstrumentDescriptor, Arc<Reader>)> = self
            .shared
            .registrations()
            .iter()
            .filter(|r| r.reader.is_attached())
            .map(|r| (r.descriptor.clone(), Arc::clone(&r.reader)))
            .collect();

        live.into_iter()
            .filter_map(|(descriptor, reader)| {
                reader.observe().map(|value| Observation {
                    name: descriptor.name().to_string(),
                    kind: reader.kind(),
                    attributes: descriptor.attributes().clone(),
                    value,
                })
            })
            .collect()
    }

    /// Descriptors of instruments that are registered and not yet closed.
    pub fn live(&self) -> Vec<InstrumentDescriptor> {
        self.shared
            .registrations()
            .iter()
            .filter(|r| r.reader.is_attached())
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.shared
            .registrations()
            .iter()
            .filter(|r| r.reader.is_attached())
            .count()
    }

    /// Total registrations ever made, closed or not.
    pub fn registered(&self) -> usize {
        self.shared.registrations().len()
    }

    pub fn close_attempts(&self) -> u64 {
        self.shared.close_attempts.load(Ordering::SeqCst)
    }

    fn register(&self, descriptor: &InstrumentDescriptor, reader: Reader) -> Box<dyn InstrumentHandle> {
        let reader = Arc::new(reader);
        self.shared.registrations().push(Registration {
            descriptor: descriptor.clone(),
            reader: Arc::clone(&reader),
        });
        Box::new(MemoryHandle {
            descriptor: descriptor.clone(),
            reader,
            shared: Arc::clone(&self.shared),
        })
    }
}

impl InstrumentSink for InMemorySink {
    fn observable_counter(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: CounterReader,
    ) -> Result<Box<dyn InstrumentHandle>> {
        Ok(self.register(descriptor, Reader::Counter(ReaderSlot::new(reader))))
    }

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        reader: GaugeReader,
    ) -> Result<Box<dyn InstrumentHandle>> {
        Ok(self.register(descriptor, Reader::Gauge(ReaderSlot::new(reader))))
    }
}

struct MemoryHandle {
    descriptor: InstrumentDescriptor,
    reader: Arc<Reader>,
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("descriptor", &self.descriptor)
            .field("kind", &self.reader.kind())
            .finish()
    }
}

impl InstrumentHandle for MemoryHandle {
    fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    fn kind(&self) -> InstrumentKind {
        self.reader.kind()
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.shared.close_attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_closes.load(Ordering::SeqCst) {
            return Err(BridgeError::Close {
                name: self.descriptor.name().to_string(),
                reason: "close rejected by sink".into(),
            });
        }
        self.reader.clear();
        Ok(())
    }
}

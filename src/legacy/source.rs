//! In-process legacy metrics registry that notifies listeners.
//!
//! Mirrors how a registry-listener metrics library behaves: listeners hear
//! about every add and remove, and a listener attached late is first told
//! about every metric already registered.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{LegacyMetric, MetricsListener};

/// Legacy metrics keyed by identifier, with listeners.
///
/// Notifications are delivered while the metric map is locked, so each
/// listener sees adds and removes for one identifier in registration order.
pub struct LegacyMetricsRegistry<Id> {
    metrics: Mutex<HashMap<Id, LegacyMetric>>,
    listeners: Mutex<Vec<Arc<dyn MetricsListener<Id>>>>,
}

impl<Id> Default for LegacyMetricsRegistry<Id> {
    fn default() -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<Id> fmt::Debug for LegacyMetricsRegistry<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyMetricsRegistry")
            .field("metrics", &self.metrics().len())
            .field("listeners", &self.listeners().len())
            .finish()
    }
}

impl<Id> LegacyMetricsRegistry<Id> {
    fn metrics(&self) -> MutexGuard<'_, HashMap<Id, LegacyMetric>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn MetricsListener<Id>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Id: Clone + Eq + Hash> LegacyMetricsRegistry<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `metric`, replacing any metric under the same id.
    pub fn register(&self, id: Id, metric: LegacyMetric) {
        let mut metrics = self.metrics();
        let listeners = self.listeners().clone();
        for listener in &listeners {
            listener.on_metric_added(&id, &metric);
        }
        metrics.insert(id, metric);
    }

    /// Remove the metric under `id`. Returns whether one was registered.
    pub fn remove(&self, id: &Id) -> bool {
        let mut metrics = self.metrics();
        if metrics.remove(id).is_none() {
            return false;
        }
        let listeners = self.listeners().clone();
        for listener in &listeners {
            listener.on_metric_removed(id);
        }
        true
    }

    /// Attach a listener and replay every existing metric to it.
    pub fn add_listener(&self, listener: Arc<dyn MetricsListener<Id>>) {
        let metrics = self.metrics();
        for (id, metric) in metrics.iter() {
            listener.on_metric_added(id, metric);
        }
        self.listeners().push(listener);
    }

    /// Detach a listener previously added. Returns whether it was attached.
    pub fn remove_listener(&self, listener: &Arc<dyn MetricsListener<Id>>) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn get(&self, id: &Id) -> Option<LegacyMetric> {
        self.metrics().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics().is_empty()
    }
}

//! Buffer holding log events until the collector confirms them.
//!
//! Appends go to the tail under the write lock. The shipment loop takes a
//! snapshot, sends it without holding the lock, and on success drains
//! exactly that many events from the front, so events appended while the
//! request was in flight stay for the next cycle.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::event::LogEvent;

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of events appended
    pub events_received: u64,

    /// Total number of events removed after a confirmed shipment
    pub events_shipped: u64,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<LogEvent>,
    stats: BufferStats,
}

/// Concurrency-safe ordered sequence of events awaiting remote shipment.
#[derive(Debug, Default)]
pub struct EventBuffer {
    inner: RwLock<Inner>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still guards a valid Vec; keep going with it.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an event to the tail.
    pub fn append(&self, event: LogEvent) {
        let mut inner = self.write();
        inner.events.push(event);
        inner.stats.events_received += 1;
    }

    /// Copy of the current contents, in emission order.
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.read().events.clone()
    }

    /// Remove the first `count` events after they were accepted remotely.
    ///
    /// Only the shipment loop removes events, and appends only touch the
    /// tail, so the first `count` events are exactly the shipped snapshot.
    pub fn drain_shipped(&self, count: usize) -> usize {
        let mut inner = self.write();
        let count = count.min(inner.events.len());
        inner.events.drain(..count);
        inner.stats.events_shipped += count as u64;

        debug!(
            shipped = count,
            remaining = inner.events.len(),
            "Drained shipped events from buffer"
        );
        count
    }

    /// Atomically take the whole contents, leaving the buffer empty.
    pub fn snapshot_and_clear(&self) -> Vec<LogEvent> {
        let mut inner = self.write();
        let events = std::mem::take(&mut inner.events);
        inner.stats.events_shipped += events.len() as u64;
        events
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().events.is_empty()
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> BufferStats {
        self.read().stats.clone()
    }
}

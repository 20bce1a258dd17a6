//! Metrics Aggregator.
//!
//! A bounded in-memory ring of completed records plus a broadcast channel
//! for live consumers, with no disk persistence — a `TurnRecord` is a
//! latency record, not a transcript, and there's no requirement to survive
//! a worker restart, so the ring stays memory-only.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use va_domain::turn::TurnRecord;

const DEFAULT_CAPACITY: usize = 500;
const BROADCAST_CAPACITY: usize = 256;

/// Holds recently completed `TurnRecord`s and fans them out to live
/// subscribers (a metrics exporter, a debug CLI, a dashboard backend).
pub struct MetricsSink {
    ring: RwLock<VecDeque<TurnRecord>>,
    capacity: usize,
    tx: broadcast::Sender<TurnRecord>,
}

impl MetricsSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
            tx,
        }
    }

    /// A new receiver for live `TurnRecord` emission. Lagging receivers
    /// silently drop the oldest unread records (broadcast's own policy);
    /// the ring below remains the source of truth for `recent`.
    pub fn subscribe(&self) -> broadcast::Receiver<TurnRecord> {
        self.tx.subscribe()
    }

    /// Record a finished turn. Emitted on `Speaking -> Listening`, whether
    /// the turn ended normally or was interrupted.
    pub fn emit(&self, record: TurnRecord) {
        {
            let mut ring = self.ring.write();
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }
        // No receivers is the common case between debugging sessions; not
        // an error.
        let _ = self.tx.send(record);
    }

    /// The `n` most recently emitted records, newest last.
    pub fn recent(&self, n: usize) -> Vec<TurnRecord> {
        let ring = self.ring.read();
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

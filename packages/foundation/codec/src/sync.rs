//! Bounded peer-sync queue.
//!
//! Flushed audit entries and KV updates are enqueued here for delivery to
//! peers. The queue is bounded: on overflow the oldest non-critical item is
//! evicted and the eviction is logged so the ledger can raise a persistence
//! alert. Critical items are only dropped when the queue is full of other
//! critical items, and that is reported to the caller.

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// An envelope waiting for peer delivery.
#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    pub envelope: Envelope,
    /// Critical items survive overflow eviction.
    pub critical: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of an enqueue under pressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Accepted without eviction.
    Accepted,
    /// Accepted after evicting this many non-critical items.
    Evicted(usize),
    /// Rejected: the queue is full of critical items.
    Rejected,
}

/// Bounded FIFO of envelopes bound for peers.
#[derive(Debug)]
pub struct SyncQueue {
    items: Mutex<VecDeque<QueuedEnvelope>>,
    capacity: usize,
}

impl SyncQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue an envelope, evicting the oldest non-critical items if full.
    pub fn enqueue(&self, envelope: Envelope, critical: bool) -> EnqueueOutcome {
        let mut items = self.items.lock();
        let mut evicted = 0usize;

        while items.len() >= self.capacity {
            let victim = items.iter().position(|queued| !queued.critical);
            match victim {
                Some(index) => {
                    let dropped = items.remove(index);
                    if let Some(dropped) = dropped {
                        tracing::warn!(
                            node_id = %dropped.envelope.node_id,
                            sequence = dropped.envelope.sequence,
                            "sync queue overflow, dropping non-critical envelope"
                        );
                    }
                    evicted += 1;
                }
                None => {
                    tracing::warn!(
                        capacity = self.capacity,
                        "sync queue saturated with critical envelopes, rejecting enqueue"
                    );
                    return EnqueueOutcome::Rejected;
                }
            }
        }

        items.push_back(QueuedEnvelope {
            envelope,
            critical,
            enqueued_at: Utc::now(),
        });

        if evicted > 0 {
            EnqueueOutcome::Evicted(evicted)
        } else {
            EnqueueOutcome::Accepted
        }
    }

    /// Take up to `max` envelopes off the front for delivery.
    pub fn drain(&self, max: usize) -> Vec<QueuedEnvelope> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    /// Put undelivered envelopes back at the front, preserving order.
    pub fn requeue_front(&self, undelivered: Vec<QueuedEnvelope>) {
        let mut items = self.items.lock();
        for queued in undelivered.into_iter().rev() {
            items.push_front(queued);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeKind;
    use crate::value::Value;

    fn envelope(sequence: u64) -> Envelope {
        Envelope::new("node-1", sequence, EnvelopeKind::Kv, Value::Null)
    }

    #[test]
    fn test_fifo_drain() {
        let queue = SyncQueue::new(8);
        queue.enqueue(envelope(1), false);
        queue.enqueue(envelope(2), false);

        let drained = queue.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].envelope.sequence, 1);
        assert_eq!(drained[1].envelope.sequence, 2);
    }

    #[test]
    fn test_overflow_evicts_oldest_non_critical() {
        let queue = SyncQueue::new(2);
        queue.enqueue(envelope(1), false);
        queue.enqueue(envelope(2), true);

        let outcome = queue.enqueue(envelope(3), false);
        assert_eq!(outcome, EnqueueOutcome::Evicted(1));

        let sequences: Vec<u64> = queue
            .drain(10)
            .into_iter()
            .map(|q| q.envelope.sequence)
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn test_critical_saturation_rejects() {
        let queue = SyncQueue::new(1);
        queue.enqueue(envelope(1), true);
        assert_eq!(queue.enqueue(envelope(2), true), EnqueueOutcome::Rejected);
    }

    #[test]
    fn test_requeue_front_preserves_order() {
        let queue = SyncQueue::new(8);
        queue.enqueue(envelope(3), false);

        queue.requeue_front(vec![
            QueuedEnvelope {
                envelope: envelope(1),
                critical: false,
                enqueued_at: Utc::now(),
            },
            QueuedEnvelope {
                envelope: envelope(2),
                critical: false,
                enqueued_at: Utc::now(),
            },
        ]);

        let sequences: Vec<u64> = queue
            .drain(10)
            .into_iter()
            .map(|q| q.envelope.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}

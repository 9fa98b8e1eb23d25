//! Outbound event broker.
//!
//! The pillars never hand out owning references to listeners; subscribers
//! get a bounded broadcast receiver and hold event payloads by value. Slow
//! subscribers lag and drop, they never block the hot path.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default broker capacity before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Every event kind the core publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AccessDecision,
    TrustScoreUpdated,
    PolicyAdded,
    PolicyRemoved,
    SegmentCreated,
    AgentQuarantined,
    AgentReleased,
    LogEntryCreated,
    SecurityAlert,
    ExternalAlert,
    ContextsCleaned,
    PerformanceMetrics,
    BlockAgent,
    RateLimit,
    NotifyAdmin,
    Escalate,
    PolicyViolations,
}

/// An event published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: Value,
}

/// Bounded fan-out broker.
#[derive(Debug, Clone)]
pub struct EventBroker {
    tx: broadcast::Sender<MeshEvent>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, kind: EventKind, payload: Value) -> usize {
        let event = MeshEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            payload,
        };
        match self.tx.send(event) {
            Ok(n) => n,
            // No receivers attached; events are advisory.
            Err(_) => 0,
        }
    }

    /// Attach a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

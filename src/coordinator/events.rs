//! Bounded history of topology transition events

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::common::timestamp_now_millis;

/// Most recent transitions kept in memory.
const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PrimaryFailed,
    PrimaryRecovered,
    FailoverBegin,
    FailoverSuccess,
    FailoverFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    /// Unix ms.
    pub timestamp: u64,
    pub shard: usize,
    pub kind: EventKind,
    pub detail: String,
}

/// Ring buffer of the most recent transition events. Shared between the
/// health monitor and the failover manager.
pub struct EventLog {
    events: Mutex<VecDeque<TransitionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn record(&self, kind: EventKind, shard: usize, detail: String) {
        let mut events = self.events.lock().unwrap();
        if events.len() == HISTORY_CAPACITY {
            events.pop_front();
        }
        events.push_back(TransitionEvent {
            timestamp: timestamp_now_millis(),
            shard,
            kind,
            detail,
        });
    }

    /// Oldest-first snapshot.
    pub fn snapshot(&self) -> Vec<TransitionEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

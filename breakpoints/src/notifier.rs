use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::types::{BreakpointId, TargetId};

/// Backend-side attributes reported by a breakpoint change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDelta {
    pub enabled: Option<bool>,
    pub ignore_count: Option<u32>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Installed {
        target: TargetId,
        breakpoint: BreakpointId,
    },
    Changed {
        target: TargetId,
        breakpoint: BreakpointId,
        delta: AttributeDelta,
    },
    Removed {
        target: TargetId,
        breakpoints: Vec<BreakpointId>,
    },
}

/// Fans breakpoint events out to every subscriber. Owned by whoever owns the
/// managers and shared between them.
#[derive(Default)]
pub struct BreakpointNotifier {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl BreakpointNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        tracing::debug!(?event, "publishing breakpoint event");
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // subscribers that have gone away are dropped
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

//! Timer management for the runner.
//!
//! Tokio-based timers for the consensus engine. Timers are spawned as tokio
//! tasks and can be cancelled; setting a timer that is already armed
//! replaces it.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use urna_core::{Event, TimerId};

/// Convert a TimerId to the corresponding Event.
fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Proposal => Event::ProposalTimer,
        TimerId::Batch => Event::BatchTimer,
    }
}

/// Manages the engine's timers.
///
/// Each timer is a tokio task that sleeps for the specified duration and
/// then sends the appropriate timer event into the event channel.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm a timer; an armed timer with the same id is cancelled first.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "timer fired");
            let _ = event_tx.send(timer_event(id)).await;
        });

        self.timers.insert(id, handle);
        debug!(?id, ?duration, "timer set");
    }

    /// Cancel a timer. A timer that does not exist or already fired is a
    /// no-op.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            debug!(?id, "timer cancelled");
        }
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(?id, "timer cancelled (shutdown)");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

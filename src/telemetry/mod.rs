//! Engine telemetry: lifecycle event broadcast and data-path statistics.
//!
//! Events go out over a bounded `tokio::sync::broadcast` channel so slow or
//! absent subscribers never hold up a lifecycle transition. Nothing here is
//! touched from an audio callback.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod events;

pub use events::{EngineEvent, EngineEventKind};

/// Default number of events retained for lagging subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Counters sampled from the running data path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Frames pushed by the input callback
    pub frames_captured: u64,
    /// Frames delivered to the output callback from captured audio
    pub frames_rendered: u64,
    /// Output frames zero-filled because no captured audio was ready
    pub underrun_frames: u64,
    /// Captured frames dropped (oldest first) because the output fell behind
    pub overrun_frames: u64,
    /// Frames waiting in the ring
    pub buffered_frames: usize,
    /// Ring capacity in frames (0 when not running)
    pub ring_capacity_frames: usize,
}

/// Broadcast hub for lifecycle events.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    origin: Instant,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            origin: Instant::now(),
        }
    }

    /// Publish an event; silently dropped when nobody is subscribed.
    pub fn publish(&self, kind: EngineEventKind) {
        let event = EngineEvent {
            timestamp_ms: self.origin.elapsed().as_millis() as u64,
            kind,
        };
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

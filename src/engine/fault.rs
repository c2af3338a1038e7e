//! Fault watcher.
//!
//! Audio callbacks can only latch a fault into the data path. One watcher
//! thread per run parks until a fault is latched (or the run is retired) and
//! then hands the fault to the engine, which tears the run down and enters
//! `Faulted` on the control side.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::callback::DataPath;
use crate::error::EngineError;

use super::core::EngineShared;

pub(crate) const WATCHER_THREAD_NAME: &str = "passthrough-fault-watch";

/// Start watching `path` for run `generation`.
///
/// The watcher holds the engine weakly so a dropped engine is never kept
/// alive by its own watcher.
pub(crate) fn spawn_watcher(
    engine: Weak<EngineShared>,
    path: Arc<DataPath>,
    generation: u64,
    poll_interval: Duration,
) -> Result<JoinHandle<()>, EngineError> {
    thread::Builder::new()
        .name(WATCHER_THREAD_NAME.to_string())
        .spawn(move || watch(engine, path, generation, poll_interval))
        .map_err(|e| EngineError::internal(format!("failed to spawn fault watcher: {}", e)))
}

fn watch(engine: Weak<EngineShared>, path: Arc<DataPath>, generation: u64, poll_interval: Duration) {
    path.register_watcher(thread::current());

    loop {
        if path.is_retired() {
            return;
        }
        if let Some(fault) = path.fault() {
            log::warn!(
                "[FaultWatcher] run {} {} stream fault: {:?}",
                generation,
                fault.direction,
                fault.kind
            );
            if let Some(engine) = engine.upgrade() {
                engine.handle_fault(generation, fault);
            }
            return;
        }
        // Unparked on latch/retire; the timeout only bounds a missed wakeup.
        thread::park_timeout(poll_interval);
    }
}

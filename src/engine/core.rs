//! PassthroughEngine: owns the duplex stream pair and its lifecycle.
//!
//! All control operations (`start`, `stop`, state and error reads, and the
//! fault watcher's teardown) serialize on one mutex. The audio callbacks
//! never touch it; they only see the run's `DataPath`.
//!
//! Run lifecycle:
//! 1. negotiate and open input then output (callbacks attached, inert)
//! 2. allocate the ring from the actual configs and bind it
//! 3. start input, then output, then spawn the fault watcher
//!
//! Teardown closes output then input, retires the data path and joins the
//! watcher. Each run gets a new generation so a late fault from an earlier
//! run cannot touch the current one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::broadcast;

use crate::audio::callback::{DataPath, StreamFault};
use crate::audio::ring_buffer::FrameRingBuffer;
use crate::config::AppConfig;
use crate::engine::backend::{self, AudioStreamHandle, DeviceStreamFactory};
use crate::engine::fault::spawn_watcher;
use crate::engine::negotiation::{close_quietly, open_duplex, DuplexConfig, OpenedDuplex};
use crate::engine::state::EngineState;
use crate::error::{log_engine_error, EngineError};
use crate::telemetry::{EngineEvent, EngineEventKind, EngineStats, EventBus, DEFAULT_EVENT_CAPACITY};

/// Resources held while Running.
struct ActiveRun {
    generation: u64,
    path: Arc<DataPath>,
    input: Box<dyn AudioStreamHandle>,
    output: Box<dyn AudioStreamHandle>,
    config: DuplexConfig,
    watcher: Option<JoinHandle<()>>,
}

struct EngineInner {
    state: EngineState,
    generation: u64,
    run: Option<ActiveRun>,
    last_error: Option<EngineError>,
    last_stats: EngineStats,
}

pub(crate) struct EngineShared {
    factory: Arc<dyn DeviceStreamFactory>,
    config: AppConfig,
    inner: Mutex<EngineInner>,
    events: EventBus,
}

impl EngineShared {
    fn lock(&self) -> Result<MutexGuard<'_, EngineInner>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::internal("engine state lock poisoned"))
    }

    /// Lock for paths that must make progress even after a panic elsewhere.
    fn lock_recovering(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close a run's streams and retire its data path.
    ///
    /// Returns the watcher handle for the caller to join (or detach when the
    /// caller is the watcher).
    fn teardown(&self, run: ActiveRun) -> (EngineStats, Option<JoinHandle<()>>) {
        close_quietly(self.factory.as_ref(), run.output);
        close_quietly(self.factory.as_ref(), run.input);
        run.path.retire();
        (run.path.stats(), run.watcher)
    }

    /// Called by the fault watcher of run `generation`.
    pub(crate) fn handle_fault(&self, generation: u64, fault: StreamFault) {
        let mut inner = self.lock_recovering();
        let is_current = inner.generation == generation
            && inner.state == EngineState::Running
            && inner.run.is_some();
        if !is_current {
            log::debug!(
                "[PassthroughEngine] ignoring fault from stale run {}",
                generation
            );
            return;
        }

        let error = fault.to_error();
        log_engine_error(&error, "stream fault");

        if let Some(run) = inner.run.take() {
            // This thread is the watcher; dropping its handle detaches it.
            let (stats, _watcher) = self.teardown(run);
            inner.last_stats = stats;
        }
        inner.state = EngineState::Faulted;
        self.events.publish(EngineEventKind::faulted(&error));
        inner.last_error = Some(error);
    }
}

/// The duplex passthrough engine.
///
/// Construct once per process (see `crate::api` for the shared instance) and
/// start/stop it as often as needed.
pub struct PassthroughEngine {
    shared: Arc<EngineShared>,
}

impl PassthroughEngine {
    pub fn new(factory: Arc<dyn DeviceStreamFactory>, config: AppConfig) -> Self {
        let shared = EngineShared {
            factory,
            config,
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                generation: 0,
                run: None,
                last_error: None,
                last_stats: EngineStats::default(),
            }),
            events: EventBus::new(DEFAULT_EVENT_CAPACITY),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Engine backed by this platform's audio backend.
    pub fn with_platform_defaults(config: AppConfig) -> Self {
        Self::new(backend::platform_factory(), config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    /// Open and start the duplex pair.
    ///
    /// A no-op returning `Ok` while Starting, Running or Stopping. Allowed
    /// from Idle and Faulted.
    ///
    /// # Errors
    /// Any `EngineError` from negotiation or stream start. On error the
    /// engine is `Faulted`, `last_error()` holds the error and no stream
    /// remains open.
    pub fn start(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;

        if inner.state.is_active() {
            log::debug!(
                "[PassthroughEngine] start() ignored, already {}",
                inner.state
            );
            return Ok(());
        }

        inner.state = EngineState::Starting;
        inner.generation += 1;
        let generation = inner.generation;
        log::info!("[PassthroughEngine] starting run {}", generation);

        match self.bring_up(generation) {
            Ok(run) => {
                let config = run.config;
                log::info!("[PassthroughEngine] running: {}", config);
                inner.run = Some(run);
                inner.state = EngineState::Running;
                inner.last_error = None;
                drop(inner);
                shared.events.publish(EngineEventKind::Started { config });
                Ok(())
            }
            Err(err) => {
                log_engine_error(&err, "start");
                inner.state = EngineState::Faulted;
                inner.last_error = Some(err.clone());
                drop(inner);
                shared.events.publish(EngineEventKind::start_failed(&err));
                Err(err)
            }
        }
    }

    fn bring_up(&self, generation: u64) -> Result<ActiveRun, EngineError> {
        let shared = &self.shared;
        let factory = shared.factory.as_ref();

        shared.config.validate()?;
        let preferred = shared.config.audio.preferred_stream();
        let OpenedDuplex {
            path,
            mut input,
            mut output,
            config,
        } = open_duplex(factory, &preferred, &shared.config.buffer)?;

        let started = path
            .bind(FrameRingBuffer::new(
                config.ring_capacity_frames,
                usize::from(config.input.channel_count),
                config.input.format,
            ))
            .and_then(|_| input.start())
            .and_then(|_| output.start())
            .and_then(|_| {
                spawn_watcher(
                    Arc::downgrade(shared),
                    Arc::clone(&path),
                    generation,
                    shared.config.faults.poll_interval(),
                )
            });

        match started {
            Ok(watcher) => Ok(ActiveRun {
                generation,
                path,
                input,
                output,
                config,
                watcher: Some(watcher),
            }),
            Err(err) => {
                close_quietly(factory, output);
                close_quietly(factory, input);
                path.retire();
                Err(err)
            }
        }
    }

    /// Stop and release both streams.
    ///
    /// Always ends in `Idle`; close errors are logged, never returned.
    pub fn stop(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock_recovering();

        let run = match inner.state {
            // Starting is never observed outside start(); Stopping means
            // another stop() owns the teardown.
            EngineState::Idle | EngineState::Starting | EngineState::Stopping => return,
            EngineState::Faulted => None,
            EngineState::Running => inner.run.take(),
        };

        // Faulted runs were already torn down; stop only acknowledges.
        let Some(run) = run else {
            inner.state = EngineState::Idle;
            return;
        };

        inner.state = EngineState::Stopping;
        log::info!("[PassthroughEngine] stopping run {}", run.generation);
        // Released while closing: a watcher reporting a fault concurrently
        // needs the lock to find out its run is gone.
        drop(inner);

        let (stats, watcher) = shared.teardown(run);
        if let Some(watcher) = watcher {
            if watcher.join().is_err() {
                log::warn!("[PassthroughEngine] fault watcher panicked");
            }
        }

        let mut inner = shared.lock_recovering();
        inner.last_stats = stats;
        inner.state = EngineState::Idle;
        drop(inner);

        log::info!(
            "[PassthroughEngine] stopped: {} frames captured, {} rendered, {} underrun, {} overrun",
            stats.frames_captured,
            stats.frames_rendered,
            stats.underrun_frames,
            stats.overrun_frames
        );
        shared.events.publish(EngineEventKind::Stopped);
    }

    pub fn current_state(&self) -> EngineState {
        self.shared.lock_recovering().state
    }

    /// Most recent start failure or stream fault.
    ///
    /// Kept across `stop()`; cleared by the next successful `start()`.
    pub fn last_error(&self) -> Option<EngineError> {
        self.shared.lock_recovering().last_error.clone()
    }

    /// Negotiated configuration while Running.
    pub fn active_config(&self) -> Option<DuplexConfig> {
        self.shared
            .lock_recovering()
            .run
            .as_ref()
            .map(|run| run.config)
    }

    /// Data-path counters of the current run, or of the last one when not
    /// running.
    pub fn stats(&self) -> EngineStats {
        let inner = self.shared.lock_recovering();
        match inner.run.as_ref() {
            Some(run) => run.path.stats(),
            None => inner.last_stats,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for PassthroughEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests;

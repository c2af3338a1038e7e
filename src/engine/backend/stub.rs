//! In-memory stream factory used for deterministic testing and tooling.
//!
//! No audio hardware is touched. The stub records every open/close, can be
//! told to reject specific (performance, sharing) candidates or to fail with
//! a given error, and lets the caller drive the registered callbacks as if it
//! were the platform audio thread.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use crate::audio::callback::{CaptureCallback, FaultKind, RenderCallback};
use crate::audio::sample::Sample;
use crate::audio::stream_config::{PerformanceMode, SharingMode, StreamConfig, StreamDirection};
use crate::error::EngineError;

use super::{AudioStreamHandle, DeviceStreamFactory};

/// Burst size reported when the caller leaves frames-per-callback to the device
pub const STUB_DEVICE_BURST: u32 = 192;

struct LiveStream<C> {
    id: u64,
    callback: C,
    started: bool,
}

#[derive(Default)]
struct StubShared {
    next_id: AtomicU64,
    input_opens: AtomicUsize,
    output_opens: AtomicUsize,
    closes: AtomicUsize,
    fail_close: AtomicBool,
    close_gate: Mutex<Option<Arc<Barrier>>>,
    rejected_modes: Mutex<Vec<(PerformanceMode, SharingMode)>>,
    open_failures: Mutex<Vec<(StreamDirection, EngineError)>>,
    start_failures: Mutex<Vec<(StreamDirection, EngineError)>>,
    coerced_frames_per_callback: Mutex<Option<u32>>,
    coerced_output_sample_rate: Mutex<Option<u32>>,
    attempts: Mutex<Vec<(StreamDirection, StreamConfig)>>,
    input: Mutex<Option<LiveStream<CaptureCallback>>>,
    output: Mutex<Option<LiveStream<RenderCallback>>>,
}

// Test double: a poisoned lock only means another test thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StubShared {
    fn check_open(&self, direction: StreamDirection, preferred: &StreamConfig) -> Result<(), EngineError> {
        lock(&self.attempts).push((direction, *preferred));

        if let Some((_, err)) = lock(&self.open_failures)
            .iter()
            .find(|(failing, _)| *failing == direction)
        {
            return Err(err.clone());
        }

        let modes = (preferred.performance_mode, preferred.sharing_mode);
        if lock(&self.rejected_modes).contains(&modes) {
            return Err(EngineError::ConfigUnsupported {
                details: format!("stub rejects {:?}/{:?}", modes.0, modes.1),
            });
        }
        Ok(())
    }

    fn actual_config(&self, direction: StreamDirection, preferred: &StreamConfig) -> StreamConfig {
        let coerced_frames = *lock(&self.coerced_frames_per_callback);
        let frames_per_callback = coerced_frames
            .or(Some(preferred.frames_per_callback).filter(|&frames| frames > 0))
            .unwrap_or(STUB_DEVICE_BURST);
        let coerced_rate = *lock(&self.coerced_output_sample_rate);
        let sample_rate = match direction {
            StreamDirection::Output => coerced_rate.unwrap_or(preferred.sample_rate),
            StreamDirection::Input => preferred.sample_rate,
        };
        StreamConfig {
            sample_rate,
            frames_per_callback,
            ..*preferred
        }
    }
}

/// Deterministic stand-in for a platform audio backend.
#[derive(Clone, Default)]
pub struct StubStreamFactory {
    shared: Arc<StubShared>,
}

impl StubStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject opens requesting this (performance, sharing) pair with
    /// `ConfigUnsupported`.
    pub fn reject_modes(self, performance: PerformanceMode, sharing: SharingMode) -> Self {
        lock(&self.shared.rejected_modes).push((performance, sharing));
        self
    }

    /// Fail every open in `direction` with `err`.
    pub fn fail_open(self, direction: StreamDirection, err: EngineError) -> Self {
        lock(&self.shared.open_failures).push((direction, err));
        self
    }

    /// Fail `start()` of streams in `direction` with `err`.
    pub fn fail_start(self, direction: StreamDirection, err: EngineError) -> Self {
        lock(&self.shared.start_failures).push((direction, err));
        self
    }

    /// Make `close()` report an error (the stream is still released).
    pub fn fail_close(self) -> Self {
        self.shared.fail_close.store(true, Ordering::SeqCst);
        self
    }

    /// Park the next `close()` on `gate` twice before it releases its stream:
    /// once to announce that teardown has begun, once to wait for permission
    /// to finish.
    pub fn hold_next_close(self, gate: Arc<Barrier>) -> Self {
        *lock(&self.shared.close_gate) = Some(gate);
        self
    }

    /// Grant this callback size regardless of what is requested.
    pub fn coerce_frames_per_callback(self, frames: u32) -> Self {
        *lock(&self.shared.coerced_frames_per_callback) = Some(frames);
        self
    }

    /// Grant output streams this sample rate regardless of what is requested.
    pub fn coerce_output_sample_rate(self, sample_rate: u32) -> Self {
        *lock(&self.shared.coerced_output_sample_rate) = Some(sample_rate);
        self
    }

    /// Clear all open failures (simulates a device coming back).
    pub fn clear_open_failures(&self) {
        lock(&self.shared.open_failures).clear();
    }

    /// Successful input opens so far
    pub fn input_opens(&self) -> usize {
        self.shared.input_opens.load(Ordering::SeqCst)
    }

    /// Successful output opens so far
    pub fn output_opens(&self) -> usize {
        self.shared.output_opens.load(Ordering::SeqCst)
    }

    /// Successful opens in both directions
    pub fn opens(&self) -> usize {
        self.input_opens() + self.output_opens()
    }

    /// Handles closed so far
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    /// Every configuration passed to an open call, in order.
    pub fn attempts(&self) -> Vec<(StreamDirection, StreamConfig)> {
        lock(&self.shared.attempts).clone()
    }

    /// Whether a started stream currently exists in `direction`.
    pub fn is_streaming(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Input => lock(&self.shared.input).as_ref().is_some_and(|s| s.started),
            StreamDirection::Output => lock(&self.shared.output).as_ref().is_some_and(|s| s.started),
        }
    }

    /// Deliver captured samples as the input audio thread would.
    ///
    /// Returns false when no started input stream exists.
    pub fn push_input<S: Sample>(&self, samples: &[S]) -> bool {
        match lock(&self.shared.input).as_mut() {
            Some(live) if live.started => {
                live.callback.on_input(samples);
                true
            }
            _ => false,
        }
    }

    /// Request output samples as the output audio thread would.
    ///
    /// Returns false when no started output stream exists.
    pub fn pull_output<S: Sample>(&self, out: &mut [S]) -> bool {
        match lock(&self.shared.output).as_mut() {
            Some(live) if live.started => {
                live.callback.on_output(out);
                true
            }
            _ => false,
        }
    }

    /// Report an asynchronous stream error from the open stream in
    /// `direction`, as a platform error callback would.
    pub fn inject_fault(&self, direction: StreamDirection, kind: FaultKind) -> bool {
        let reporter = match direction {
            StreamDirection::Input => lock(&self.shared.input)
                .as_ref()
                .map(|live| live.callback.fault_reporter()),
            StreamDirection::Output => lock(&self.shared.output)
                .as_ref()
                .map(|live| live.callback.fault_reporter()),
        };
        match reporter {
            Some(reporter) => {
                reporter.report(kind);
                true
            }
            None => false,
        }
    }
}

impl DeviceStreamFactory for StubStreamFactory {
    fn open_input(
        &self,
        preferred: &StreamConfig,
        callback: CaptureCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        self.shared.check_open(StreamDirection::Input, preferred)?;

        let actual = self.shared.actual_config(StreamDirection::Input, preferred);
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.input) = Some(LiveStream {
            id,
            callback,
            started: false,
        });
        self.shared.input_opens.fetch_add(1, Ordering::SeqCst);

        let handle = StubStreamHandle {
            id,
            direction: StreamDirection::Input,
            config: actual,
            shared: Arc::clone(&self.shared),
        };
        Ok((Box::new(handle), actual))
    }

    fn open_output(
        &self,
        preferred: &StreamConfig,
        callback: RenderCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        self.shared.check_open(StreamDirection::Output, preferred)?;

        let actual = self.shared.actual_config(StreamDirection::Output, preferred);
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.output) = Some(LiveStream {
            id,
            callback,
            started: false,
        });
        self.shared.output_opens.fetch_add(1, Ordering::SeqCst);

        let handle = StubStreamHandle {
            id,
            direction: StreamDirection::Output,
            config: actual,
            shared: Arc::clone(&self.shared),
        };
        Ok((Box::new(handle), actual))
    }
}

struct StubStreamHandle {
    id: u64,
    direction: StreamDirection,
    config: StreamConfig,
    shared: Arc<StubShared>,
}

impl AudioStreamHandle for StubStreamHandle {
    fn direction(&self) -> StreamDirection {
        self.direction
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if let Some((_, err)) = lock(&self.shared.start_failures)
            .iter()
            .find(|(failing, _)| *failing == self.direction)
        {
            return Err(err.clone());
        }

        match self.direction {
            StreamDirection::Input => {
                if let Some(live) = lock(&self.shared.input).as_mut().filter(|l| l.id == self.id) {
                    live.started = true;
                }
            }
            StreamDirection::Output => {
                if let Some(live) = lock(&self.shared.output).as_mut().filter(|l| l.id == self.id) {
                    live.started = true;
                }
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        let gate = lock(&self.shared.close_gate).take();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }

        // Dropping the callback is what guarantees no callback after close.
        match self.direction {
            StreamDirection::Input => {
                let mut slot = lock(&self.shared.input);
                if slot.as_ref().is_some_and(|live| live.id == self.id) {
                    *slot = None;
                }
            }
            StreamDirection::Output => {
                let mut slot = lock(&self.shared.output);
                if slot.as_ref().is_some_and(|live| live.id == self.id) {
                    *slot = None;
                }
            }
        }
        self.shared.closes.fetch_add(1, Ordering::SeqCst);

        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(EngineError::internal(format!(
                "stub {} stream close reported an error",
                self.direction
            )));
        }
        Ok(())
    }
}

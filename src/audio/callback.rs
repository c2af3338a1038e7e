//! Audio callbacks - the real-time half of the passthrough engine
//!
//! Every backend hands platform audio buffers to exactly two objects:
//! - `CaptureCallback`: input stream thread, pushes captured frames into the ring
//! - `RenderCallback`: output stream thread, pulls frames and zero-fills shortfalls
//!
//! Both share a `DataPath` with the control side. The ring is bound to the
//! data path only after both streams have been opened and their actual
//! configuration is known; until then capture discards and render emits
//! silence.
//!
//! # Real-Time Safety
//! Nothing reachable from `on_input`, `on_output` or `FaultReporter::report`
//! allocates, locks, logs or blocks:
//! - ring access is wait-free (see `ring_buffer`)
//! - counters are relaxed atomics
//! - faults are latched with a single compare-exchange plus a thread unpark

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::Thread;

use super::ring_buffer::FrameRingBuffer;
use super::sample::{fill_silence, Sample};
use super::stream_config::StreamDirection;
use crate::error::EngineError;
use crate::telemetry::EngineStats;

/// Kind of asynchronous failure a platform stream can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Device went away (hot-plug, route change)
    Disconnected,
    /// Any other driver or stream error
    Errored,
}

/// Asynchronous stream failure latched by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFault {
    pub direction: StreamDirection,
    pub kind: FaultKind,
}

impl StreamFault {
    fn encode(self) -> u32 {
        let direction = match self.direction {
            StreamDirection::Input => 0,
            StreamDirection::Output => 2,
        };
        let kind = match self.kind {
            FaultKind::Disconnected => 0,
            FaultKind::Errored => 1,
        };
        1 + direction + kind
    }

    fn decode(code: u32) -> Option<Self> {
        let raw = code.checked_sub(1)?;
        if raw > 3 {
            return None;
        }
        let direction = if raw & 2 == 0 {
            StreamDirection::Input
        } else {
            StreamDirection::Output
        };
        let kind = if raw & 1 == 0 {
            FaultKind::Disconnected
        } else {
            FaultKind::Errored
        };
        Some(Self { direction, kind })
    }

    /// Error recorded as the engine's last error for this fault.
    pub fn to_error(self) -> EngineError {
        match self.kind {
            FaultKind::Disconnected => EngineError::StreamDisconnected {
                details: format!("{} stream lost its device", self.direction),
            },
            FaultKind::Errored => EngineError::InternalFault {
                details: format!("{} stream reported an asynchronous error", self.direction),
            },
        }
    }
}

/// State shared between the two audio callbacks and the control side for
/// one run of the engine.
#[derive(Default)]
pub struct DataPath {
    ring: OnceLock<FrameRingBuffer>,
    frames_captured: AtomicU64,
    frames_rendered: AtomicU64,
    underrun_frames: AtomicU64,
    fault: AtomicU32,
    retired: AtomicBool,
    watcher: OnceLock<Thread>,
}

impl DataPath {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach the ring sized from the negotiated configuration.
    ///
    /// # Errors
    /// Returns `InternalFault` if a ring is already bound.
    pub fn bind(&self, ring: FrameRingBuffer) -> Result<(), EngineError> {
        self.ring
            .set(ring)
            .map_err(|_| EngineError::internal("data path already has a ring bound"))
    }

    pub fn ring(&self) -> Option<&FrameRingBuffer> {
        self.ring.get()
    }

    /// First fault latched during this run, if any.
    pub fn fault(&self) -> Option<StreamFault> {
        StreamFault::decode(self.fault.load(Ordering::Acquire))
    }

    /// Latch `fault` if none is latched yet and wake the watcher.
    fn latch_fault(&self, fault: StreamFault) {
        if self
            .fault
            .compare_exchange(0, fault.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(watcher) = self.watcher.get() {
                watcher.unpark();
            }
        }
    }

    /// Register the thread to unpark when a fault is latched or the run is
    /// retired.
    pub(crate) fn register_watcher(&self, thread: Thread) {
        let _ = self.watcher.set(thread);
    }

    /// Mark the run as torn down; the watcher exits on its next wake.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.get() {
            watcher.unpark();
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> EngineStats {
        let (overrun_frames, buffered_frames, ring_capacity_frames) = match self.ring() {
            Some(ring) => (ring.overrun_frames(), ring.available(), ring.capacity()),
            None => (0, 0, 0),
        };
        EngineStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            overrun_frames,
            buffered_frames,
            ring_capacity_frames,
        }
    }
}

/// Cloneable handle a backend uses to report asynchronous stream errors,
/// typically from a platform error callback.
#[derive(Clone)]
pub struct FaultReporter {
    path: Arc<DataPath>,
    direction: StreamDirection,
}

impl FaultReporter {
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Record a fault. Only the first fault of a run is kept.
    pub fn report(&self, kind: FaultKind) {
        self.path.latch_fault(StreamFault {
            direction: self.direction,
            kind,
        });
    }
}

/// Input-stream callback: captured frames into the ring.
pub struct CaptureCallback {
    path: Arc<DataPath>,
}

impl CaptureCallback {
    pub fn new(path: Arc<DataPath>) -> Self {
        Self { path }
    }

    /// Handle one buffer of interleaved captured samples.
    #[inline]
    pub fn on_input<S: Sample>(&mut self, samples: &[S]) {
        let Some(ring) = self.path.ring() else {
            return;
        };
        if ring.format() != S::FORMAT {
            return;
        }
        let stored = ring.write(samples);
        self.path
            .frames_captured
            .fetch_add(stored as u64, Ordering::Relaxed);
    }

    pub fn fault_reporter(&self) -> FaultReporter {
        FaultReporter {
            path: Arc::clone(&self.path),
            direction: StreamDirection::Input,
        }
    }
}

/// Output-stream callback: ring frames into the device buffer.
pub struct RenderCallback {
    path: Arc<DataPath>,
}

impl RenderCallback {
    pub fn new(path: Arc<DataPath>) -> Self {
        Self { path }
    }

    /// Fill one buffer of interleaved output samples.
    ///
    /// Whatever the ring cannot supply is written as silence.
    #[inline]
    pub fn on_output<S: Sample>(&mut self, out: &mut [S]) {
        let ring = match self.path.ring() {
            Some(ring) if ring.format() == S::FORMAT => ring,
            _ => {
                fill_silence(out);
                return;
            }
        };

        let channels = ring.channels();
        let wanted = out.len() / channels;
        let got = ring.read(out);
        fill_silence(&mut out[got * channels..]);

        self.path
            .frames_rendered
            .fetch_add(got as u64, Ordering::Relaxed);
        if got < wanted {
            self.path
                .underrun_frames
                .fetch_add((wanted - got) as u64, Ordering::Relaxed);
        }
    }

    pub fn fault_reporter(&self) -> FaultReporter {
        FaultReporter {
            path: Arc::clone(&self.path),
            direction: StreamDirection::Output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream_config::SampleFormat;

    fn bound_path(capacity: usize, channels: usize) -> Arc<DataPath> {
        let path = DataPath::new();
        path.bind(FrameRingBuffer::new(capacity, channels, SampleFormat::Float32))
            .unwrap();
        path
    }

    #[test]
    fn test_capture_is_inert_before_bind() {
        let path = DataPath::new();
        let mut capture = CaptureCallback::new(Arc::clone(&path));
        capture.on_input(&[0.5_f32; 8]);
        assert_eq!(path.stats().frames_captured, 0);
    }

    #[test]
    fn test_render_emits_silence_before_bind() {
        let path = DataPath::new();
        let mut render = RenderCallback::new(Arc::clone(&path));
        let mut out = [0.7_f32; 8];
        render.on_output(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(path.stats().underrun_frames, 0);
    }

    #[test]
    fn test_passthrough_copies_captured_frames() {
        let path = bound_path(16, 2);
        let mut capture = CaptureCallback::new(Arc::clone(&path));
        let mut render = RenderCallback::new(Arc::clone(&path));

        capture.on_input(&[0.1_f32, 0.2, 0.3, 0.4]);
        let mut out = [0.0_f32; 4];
        render.on_output(&mut out);

        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        let stats = path.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.frames_rendered, 2);
        assert_eq!(stats.underrun_frames, 0);
    }

    #[test]
    fn test_underflow_fills_remainder_with_silence() {
        let path = bound_path(16, 1);
        let mut capture = CaptureCallback::new(Arc::clone(&path));
        let mut render = RenderCallback::new(Arc::clone(&path));

        capture.on_input(&[0.9_f32, 0.8]);
        let mut out = [1.0_f32; 6];
        render.on_output(&mut out);

        assert_eq!(out, [0.9, 0.8, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(path.stats().underrun_frames, 4);
    }

    #[test]
    fn test_pcm16_underflow_is_zero() {
        let path = DataPath::new();
        path.bind(FrameRingBuffer::new(8, 1, SampleFormat::Pcm16))
            .unwrap();
        let mut render = RenderCallback::new(Arc::clone(&path));

        let mut out = [i16::MAX; 4];
        render.on_output(&mut out);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_format_mismatch_is_ignored() {
        let path = bound_path(8, 1);
        let mut capture = CaptureCallback::new(Arc::clone(&path));
        capture.on_input(&[100_i16, 200]);
        assert_eq!(path.stats().frames_captured, 0);
    }

    #[test]
    fn test_bind_twice_fails() {
        let path = bound_path(8, 1);
        let second = path.bind(FrameRingBuffer::new(8, 1, SampleFormat::Float32));
        assert!(matches!(second, Err(EngineError::InternalFault { .. })));
    }

    #[test]
    fn test_first_fault_wins() {
        let path = DataPath::new();
        let capture = CaptureCallback::new(Arc::clone(&path));
        let render = RenderCallback::new(Arc::clone(&path));

        assert_eq!(path.fault(), None);
        render.fault_reporter().report(FaultKind::Disconnected);
        capture.fault_reporter().report(FaultKind::Errored);

        assert_eq!(
            path.fault(),
            Some(StreamFault {
                direction: StreamDirection::Output,
                kind: FaultKind::Disconnected,
            })
        );
    }

    #[test]
    fn test_fault_encoding_round_trips() {
        for direction in [StreamDirection::Input, StreamDirection::Output] {
            for kind in [FaultKind::Disconnected, FaultKind::Errored] {
                let fault = StreamFault { direction, kind };
                assert_eq!(StreamFault::decode(fault.encode()), Some(fault));
            }
        }
        assert_eq!(StreamFault::decode(0), None);
    }

    #[test]
    fn test_fault_maps_to_engine_error() {
        let fault = StreamFault {
            direction: StreamDirection::Input,
            kind: FaultKind::Disconnected,
        };
        assert!(matches!(
            fault.to_error(),
            EngineError::StreamDisconnected { .. }
        ));

        let fault = StreamFault {
            direction: StreamDirection::Output,
            kind: FaultKind::Errored,
        };
        assert!(matches!(fault.to_error(), EngineError::InternalFault { .. }));
    }
}

//! Duplex stream negotiation.
//!
//! Walks `FALLBACK_LADDER` from the most aggressive (performance, sharing)
//! pair down, opening input first and then output with the input's actual
//! rate, channel count and format. A candidate is abandoned (closing whatever
//! it opened) when either side rejects the configuration or the two sides
//! disagree on the frame format. Device and permission failures end the walk
//! immediately since a gentler mode cannot fix them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::callback::{CaptureCallback, DataPath, RenderCallback};
use crate::audio::ring_buffer::FrameRingBuffer;
use crate::audio::stream_config::{StreamConfig, FALLBACK_LADDER};
use crate::config::BufferConfig;
use crate::engine::backend::{AudioStreamHandle, DeviceStreamFactory};
use crate::error::EngineError;

/// Configuration of a negotiated input/output pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplexConfig {
    pub input: StreamConfig,
    pub output: StreamConfig,
    /// Capacity of the ring bridging the two callbacks
    pub ring_capacity_frames: usize,
}

impl DuplexConfig {
    /// Worst-case buffering the ring can add, in milliseconds.
    pub fn ring_latency_ms(&self) -> f64 {
        self.input.frames_to_ms(self.ring_capacity_frames)
    }
}

impl fmt::Display for DuplexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in [{}] / out [{}] / ring {} frames ({:.1} ms)",
            self.input,
            self.output,
            self.ring_capacity_frames,
            self.ring_latency_ms()
        )
    }
}

/// Streams opened (not started) for one run, with their shared data path.
pub(crate) struct OpenedDuplex {
    pub path: Arc<DataPath>,
    pub input: Box<dyn AudioStreamHandle>,
    pub output: Box<dyn AudioStreamHandle>,
    pub config: DuplexConfig,
}

/// Ring capacity for a negotiated pair.
pub fn ring_capacity(input: &StreamConfig, output: &StreamConfig, buffer: &BufferConfig) -> usize {
    let period = match input.frames_per_callback.max(output.frames_per_callback) {
        0 => buffer.fallback_frames_per_callback,
        frames => frames,
    };
    FrameRingBuffer::capacity_for(period, buffer.jitter_multiplier)
}

/// Open an input/output pair, falling back through the ladder.
///
/// # Errors
/// - `ConfigUnsupported` when every candidate was rejected
/// - any other error from the factory, unchanged, on the first candidate
///   that hits it
///
/// On error nothing remains open.
pub(crate) fn open_duplex(
    factory: &dyn DeviceStreamFactory,
    preferred: &StreamConfig,
    buffer: &BufferConfig,
) -> Result<OpenedDuplex, EngineError> {
    let mut last_rejection = String::from("no candidates tried");

    for (performance_mode, sharing_mode) in FALLBACK_LADDER {
        let candidate = preferred.with_modes(performance_mode, sharing_mode);
        match open_candidate(factory, &candidate, buffer) {
            Ok(opened) => return Ok(opened),
            Err(EngineError::ConfigUnsupported { details }) => {
                log::info!(
                    "[Negotiation] {:?}/{:?} rejected: {}",
                    performance_mode,
                    sharing_mode,
                    details
                );
                last_rejection = details;
            }
            Err(err) => return Err(err),
        }
    }

    Err(EngineError::ConfigUnsupported {
        details: format!("all fallback candidates rejected; last: {}", last_rejection),
    })
}

fn open_candidate(
    factory: &dyn DeviceStreamFactory,
    candidate: &StreamConfig,
    buffer: &BufferConfig,
) -> Result<OpenedDuplex, EngineError> {
    // Fresh per candidate so nothing latched by an abandoned stream leaks
    // into the run.
    let path = DataPath::new();

    let (input, input_config) =
        factory.open_input(candidate, CaptureCallback::new(Arc::clone(&path)))?;

    let output_request = StreamConfig {
        sample_rate: input_config.sample_rate,
        channel_count: input_config.channel_count,
        format: input_config.format,
        ..*candidate
    };
    let (output, output_config) =
        match factory.open_output(&output_request, RenderCallback::new(Arc::clone(&path))) {
            Ok(opened) => opened,
            Err(err) => {
                close_quietly(factory, input);
                return Err(err);
            }
        };

    if !input_config.is_duplex_compatible(&output_config) {
        close_quietly(factory, output);
        close_quietly(factory, input);
        return Err(EngineError::ConfigUnsupported {
            details: format!(
                "output granted [{}] which cannot carry input [{}]",
                output_config, input_config
            ),
        });
    }

    let config = DuplexConfig {
        input: input_config,
        output: output_config,
        ring_capacity_frames: ring_capacity(&input_config, &output_config, buffer),
    };
    Ok(OpenedDuplex {
        path,
        input,
        output,
        config,
    })
}

/// Close a handle, logging instead of propagating a close error.
pub(crate) fn close_quietly(factory: &dyn DeviceStreamFactory, handle: Box<dyn AudioStreamHandle>) {
    let direction = handle.direction();
    if let Err(err) = factory.close(handle) {
        log::warn!("[Negotiation] closing {} stream failed: {}", direction, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream_config::{
        PerformanceMode, SampleFormat, SharingMode, StreamDirection,
    };
    use crate::engine::backend::StubStreamFactory;

    fn preferred() -> StreamConfig {
        StreamConfig {
            sample_rate: 48_000,
            channel_count: 2,
            format: SampleFormat::Float32,
            frames_per_callback: 0,
            sharing_mode: SharingMode::Exclusive,
            performance_mode: PerformanceMode::LowLatency,
        }
    }

    #[test]
    fn test_first_candidate_wins_when_accepted() {
        let factory = StubStreamFactory::new();
        let opened = open_duplex(&factory, &preferred(), &BufferConfig::default()).unwrap();

        assert_eq!(opened.config.input.sharing_mode, SharingMode::Exclusive);
        assert_eq!(opened.config.output.performance_mode, PerformanceMode::LowLatency);
        assert_eq!(factory.open_handles(), 2);

        close_quietly(&factory, opened.output);
        close_quietly(&factory, opened.input);
        assert_eq!(factory.open_handles(), 0);
    }

    #[test]
    fn test_falls_back_to_most_permissive_candidate() {
        let factory = StubStreamFactory::new()
            .reject_modes(PerformanceMode::LowLatency, SharingMode::Exclusive)
            .reject_modes(PerformanceMode::LowLatency, SharingMode::Shared);

        let opened = open_duplex(&factory, &preferred(), &BufferConfig::default()).unwrap();
        assert_eq!(opened.config.input.performance_mode, PerformanceMode::None);
        assert_eq!(opened.config.input.sharing_mode, SharingMode::Shared);
        assert_eq!(factory.attempts().len(), 4);
    }

    #[test]
    fn test_exhausted_ladder_is_config_unsupported() {
        let mut factory = StubStreamFactory::new();
        for (performance, sharing) in FALLBACK_LADDER {
            factory = factory.reject_modes(performance, sharing);
        }

        let result = open_duplex(&factory, &preferred(), &BufferConfig::default());
        assert!(matches!(result, Err(EngineError::ConfigUnsupported { .. })));
        assert_eq!(factory.open_handles(), 0);
    }

    #[test]
    fn test_output_failure_closes_input() {
        let factory = StubStreamFactory::new().fail_open(
            StreamDirection::Output,
            EngineError::DeviceUnavailable {
                details: "no speaker".to_string(),
            },
        );

        let result = open_duplex(&factory, &preferred(), &BufferConfig::default());
        assert!(matches!(result, Err(EngineError::DeviceUnavailable { .. })));
        assert_eq!(factory.input_opens(), 1);
        assert_eq!(factory.closes(), 1);
        // Device errors are not retried with gentler modes.
        assert_eq!(factory.attempts().len(), 2);
    }

    #[test]
    fn test_rate_mismatch_abandons_candidate() {
        let factory = StubStreamFactory::new().coerce_output_sample_rate(44_100);

        let result = open_duplex(&factory, &preferred(), &BufferConfig::default());
        assert!(matches!(result, Err(EngineError::ConfigUnsupported { .. })));
        assert_eq!(factory.opens(), 6);
        assert_eq!(factory.open_handles(), 0);
    }

    #[test]
    fn test_ring_capacity_uses_larger_period() {
        let input = preferred();
        let output = StreamConfig {
            frames_per_callback: 96,
            ..input
        };
        let buffer = BufferConfig::default();
        assert_eq!(ring_capacity(&input, &output, &buffer), 256);

        let neither = ring_capacity(&input, &input, &buffer);
        assert_eq!(neither, 512);
    }
}

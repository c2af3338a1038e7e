//! Stream configuration types shared by every backend.
//!
//! A `StreamConfig` is immutable once a stream is opened: backends report the
//! configuration they actually negotiated and callers size everything from
//! that, never from what they asked for.

use serde::{Deserialize, Serialize};
use std::fmt;

/// PCM sample encoding of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    Pcm16,
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm16 => 2,
            SampleFormat::Float32 => 4,
        }
    }
}

/// Whether the stream may share the device with other apps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    Exclusive,
    Shared,
}

/// Latency/power trade-off requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    LowLatency,
    PowerSaving,
    None,
}

/// Capture or render side of the duplex pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    Input,
    Output,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Input => write!(f, "input"),
            StreamDirection::Output => write!(f, "output"),
        }
    }
}

/// Candidate (performance, sharing) pairs, most aggressive first.
///
/// Re-walked on every `start()`: device capabilities can change between runs.
pub const FALLBACK_LADDER: [(PerformanceMode, SharingMode); 3] = [
    (PerformanceMode::LowLatency, SharingMode::Exclusive),
    (PerformanceMode::LowLatency, SharingMode::Shared),
    (PerformanceMode::None, SharingMode::Shared),
];

/// Parameters of one audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channel_count: u16,
    /// Sample encoding
    pub format: SampleFormat,
    /// Frames delivered per callback (0 = device chooses)
    pub frames_per_callback: u32,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
}

impl StreamConfig {
    /// Copy of this config with the given performance and sharing modes.
    pub fn with_modes(self, performance_mode: PerformanceMode, sharing_mode: SharingMode) -> Self {
        Self {
            performance_mode,
            sharing_mode,
            ..self
        }
    }

    /// Whether `other` can exchange raw frames with this stream (no resampling
    /// or channel remapping).
    pub fn is_duplex_compatible(&self, other: &StreamConfig) -> bool {
        self.sample_rate == other.sample_rate
            && self.channel_count == other.channel_count
            && self.format == other.format
    }

    /// Duration of `frames` at this sample rate, in milliseconds.
    pub fn frames_to_ms(&self, frames: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 * 1000.0 / self.sample_rate as f64
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz x{} {:?}, {} frames/callback, {:?}/{:?}",
            self.sample_rate,
            self.channel_count,
            self.format,
            self.frames_per_callback,
            self.performance_mode,
            self.sharing_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamConfig {
        StreamConfig {
            sample_rate: 48_000,
            channel_count: 2,
            format: SampleFormat::Float32,
            frames_per_callback: 192,
            sharing_mode: SharingMode::Exclusive,
            performance_mode: PerformanceMode::LowLatency,
        }
    }

    #[test]
    fn test_fallback_ladder_order() {
        assert_eq!(
            FALLBACK_LADDER,
            [
                (PerformanceMode::LowLatency, SharingMode::Exclusive),
                (PerformanceMode::LowLatency, SharingMode::Shared),
                (PerformanceMode::None, SharingMode::Shared),
            ]
        );
    }

    #[test]
    fn test_with_modes_keeps_other_fields() {
        let relaxed = config().with_modes(PerformanceMode::None, SharingMode::Shared);
        assert_eq!(relaxed.performance_mode, PerformanceMode::None);
        assert_eq!(relaxed.sharing_mode, SharingMode::Shared);
        assert_eq!(relaxed.sample_rate, 48_000);
        assert_eq!(relaxed.frames_per_callback, 192);
    }

    #[test]
    fn test_duplex_compatibility_ignores_modes_and_burst() {
        let input = config();
        let output = StreamConfig {
            frames_per_callback: 96,
            sharing_mode: SharingMode::Shared,
            ..input
        };
        assert!(input.is_duplex_compatible(&output));

        let resampled = StreamConfig {
            sample_rate: 44_100,
            ..input
        };
        assert!(!input.is_duplex_compatible(&resampled));

        let pcm = StreamConfig {
            format: SampleFormat::Pcm16,
            ..input
        };
        assert!(!input.is_duplex_compatible(&pcm));
    }

    #[test]
    fn test_frames_to_ms() {
        assert!((config().frames_to_ms(480) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&config()).unwrap();
        assert!(json.contains("\"low_latency\""));
        assert!(json.contains("\"float32\""));
    }
}

//! Configuration management for the passthrough engine
//!
//! This module provides runtime configuration loading from JSON files so the
//! preferred stream parameters and buffering margins can be tuned without
//! recompiling. A missing or malformed file falls back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audio::ring_buffer::{MAX_JITTER_MULTIPLIER, MIN_JITTER_MULTIPLIER};
use crate::audio::stream_config::{PerformanceMode, SampleFormat, SharingMode, StreamConfig};
use crate::error::EngineError;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub faults: FaultConfig,
}

/// Preferred stream parameters (the platform may coerce them)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// 1 (mono) or 2 (stereo)
    pub channel_count: u16,
    pub format: SampleFormat,
    /// Frames per callback; 0 lets the device pick its burst size
    pub frames_per_callback: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channel_count: 2,
            format: SampleFormat::Float32,
            frames_per_callback: 0,
        }
    }
}

impl AudioConfig {
    /// Preferred configuration at the top of the fallback ladder.
    pub fn preferred_stream(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            format: self.format,
            frames_per_callback: self.frames_per_callback,
            sharing_mode: SharingMode::Exclusive,
            performance_mode: PerformanceMode::LowLatency,
        }
    }
}

/// Ring sizing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Ring holds roughly this many callback periods (2..=4)
    pub jitter_multiplier: u32,
    /// Callback size assumed when the device reports none
    pub fallback_frames_per_callback: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            jitter_multiplier: 2,
            fallback_frames_per_callback: 192,
        }
    }
}

/// Fault watcher parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Upper bound on how long a latched fault waits before teardown
    pub poll_interval_ms: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
        }
    }
}

impl FaultConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing, not
    /// valid JSON, or fails validation.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                        config
                    }
                    Err(err) => {
                        log::warn!(
                            "[Config] Invalid configuration in {:?}: {}. Using defaults.",
                            path.as_ref(),
                            err
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Configuration for the Android build.
    ///
    /// The shared library has no asset access of its own, so the defaults
    /// are used.
    #[cfg(target_os = "android")]
    pub fn load_android() -> Self {
        log::info!("[Config] Using default configuration on Android");
        Self::default()
    }

    /// Load configuration for non-Android platforms
    #[cfg(not(target_os = "android"))]
    pub fn load() -> Self {
        Self::load_from_file("assets/passthrough_config.json")
    }

    /// Platform-appropriate configuration
    pub fn load_platform() -> Self {
        #[cfg(target_os = "android")]
        {
            Self::load_android()
        }

        #[cfg(not(target_os = "android"))]
        {
            Self::load()
        }
    }

    /// Reject configurations no backend could honor.
    pub fn validate(&self) -> Result<(), EngineError> {
        let unsupported = |details: String| Err(EngineError::ConfigUnsupported { details });

        if self.audio.sample_rate == 0 {
            return unsupported("sample_rate must be greater than 0".to_string());
        }
        if !(1..=2).contains(&self.audio.channel_count) {
            return unsupported(format!(
                "channel_count must be 1 or 2 (got {})",
                self.audio.channel_count
            ));
        }
        if !(MIN_JITTER_MULTIPLIER..=MAX_JITTER_MULTIPLIER).contains(&self.buffer.jitter_multiplier)
        {
            return unsupported(format!(
                "jitter_multiplier must be within {}..={} (got {})",
                MIN_JITTER_MULTIPLIER, MAX_JITTER_MULTIPLIER, self.buffer.jitter_multiplier
            ));
        }
        if self.buffer.fallback_frames_per_callback == 0 {
            return unsupported("fallback_frames_per_callback must be greater than 0".to_string());
        }
        Ok(())
    }
}

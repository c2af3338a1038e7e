// Audio module - real-time data path between the capture and render streams

pub mod callback;
pub mod ring_buffer;
pub mod sample;
pub mod stream_config;

// Re-export commonly used types for convenience
pub use callback::{CaptureCallback, DataPath, FaultKind, FaultReporter, RenderCallback, StreamFault};
pub use ring_buffer::FrameRingBuffer;
pub use sample::Sample;
pub use stream_config::{
    PerformanceMode, SampleFormat, SharingMode, StreamConfig, StreamDirection, FALLBACK_LADDER,
};

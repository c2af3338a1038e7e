//! Platform backends behind the `DeviceStreamFactory` seam.
//!
//! A factory opens one stream per call with its callback already attached,
//! but does not start it. Opening is atomic: either a ready handle comes back
//! together with the configuration the platform actually granted, or an
//! error does and nothing stays open.

use crate::audio::callback::{CaptureCallback, RenderCallback};
use crate::audio::stream_config::{StreamConfig, StreamDirection};
use crate::error::EngineError;

/// Opened platform stream, exclusively owned by the engine.
pub trait AudioStreamHandle: Send {
    fn direction(&self) -> StreamDirection;

    /// Configuration the platform granted at open time
    fn config(&self) -> &StreamConfig;

    /// Begin delivering (input) or requesting (output) callbacks.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop callbacks and release the stream.
    ///
    /// Once this returns no further callback fires, even if it reports an
    /// error.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Opens and closes streams against a platform audio backend.
pub trait DeviceStreamFactory: Send + Sync {
    /// Open the capture stream.
    ///
    /// # Errors
    /// - `DeviceUnavailable` when there is no input device
    /// - `ConfigUnsupported` when `preferred` cannot be honored
    /// - `PermissionDenied` when microphone access is not granted
    fn open_input(
        &self,
        preferred: &StreamConfig,
        callback: CaptureCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError>;

    /// Open the render stream.
    ///
    /// # Errors
    /// - `DeviceUnavailable` when there is no output device
    /// - `ConfigUnsupported` when `preferred` cannot be honored
    fn open_output(
        &self,
        preferred: &StreamConfig,
        callback: RenderCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError>;

    /// Close a handle this factory opened, releasing any routing resources
    /// acquired with it.
    fn close(&self, handle: Box<dyn AudioStreamHandle>) -> Result<(), EngineError> {
        handle.close()
    }
}

#[cfg(target_os = "android")]
mod oboe;
#[cfg(target_os = "android")]
pub use self::oboe::OboeStreamFactory;

#[cfg(not(target_os = "android"))]
mod cpal;
#[cfg(not(target_os = "android"))]
pub use self::cpal::CpalStreamFactory;

mod stub;
pub use stub::StubStreamFactory;

/// Factory for the platform this crate was built for.
pub fn platform_factory() -> std::sync::Arc<dyn DeviceStreamFactory> {
    #[cfg(target_os = "android")]
    {
        std::sync::Arc::new(OboeStreamFactory::new())
    }

    #[cfg(not(target_os = "android"))]
    {
        std::sync::Arc::new(CpalStreamFactory::new())
    }
}

// Engine error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants exposed to the hosting service
///
/// These constants are the single source of truth for the integer codes the
/// JNI bridge hands back to Kotlin. `0` is reserved for "no error".
///
/// Error code range: 2001-2005
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// No input or output device present
    pub const DEVICE_UNAVAILABLE: i32 = 2001;

    /// Even the most permissive stream configuration was rejected
    pub const CONFIG_UNSUPPORTED: i32 = 2002;

    /// Microphone permission revoked before the input stream could open
    pub const PERMISSION_DENIED: i32 = 2003;

    /// A running stream lost its device (hot-plug, route change)
    pub const STREAM_DISCONNECTED: i32 = 2004;

    /// Unexpected platform or engine failure
    pub const INTERNAL_FAULT: i32 = 2005;
}

/// Log an engine error with structured context
///
/// Logs the numeric code, component and message. Never call this from an
/// audio callback.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=PassthroughEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Passthrough engine errors
///
/// Synchronous failures of `start()` are returned directly; asynchronous
/// stream failures are recorded as the engine's last error.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No input or output device present
    DeviceUnavailable { details: String },

    /// No candidate configuration could be opened
    ConfigUnsupported { details: String },

    /// Microphone access was revoked
    PermissionDenied,

    /// Stream disconnected from its device while running
    StreamDisconnected { details: String },

    /// Unexpected platform callback error or broken engine invariant
    InternalFault { details: String },
}

impl EngineError {
    /// Whether the caller may reasonably retry `start()` after this error.
    ///
    /// Permission and device conditions can change under the caller (user
    /// grants access, headset plugged back in); configuration and internal
    /// faults will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::DeviceUnavailable { .. }
                | EngineError::PermissionDenied
                | EngineError::StreamDisconnected { .. }
        )
    }

    pub(crate) fn internal(details: impl Into<String>) -> Self {
        EngineError::InternalFault {
            details: details.into(),
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::DeviceUnavailable { .. } => EngineErrorCodes::DEVICE_UNAVAILABLE,
            EngineError::ConfigUnsupported { .. } => EngineErrorCodes::CONFIG_UNSUPPORTED,
            EngineError::PermissionDenied => EngineErrorCodes::PERMISSION_DENIED,
            EngineError::StreamDisconnected { .. } => EngineErrorCodes::STREAM_DISCONNECTED,
            EngineError::InternalFault { .. } => EngineErrorCodes::INTERNAL_FAULT,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::DeviceUnavailable { details } => {
                format!("Audio device unavailable: {}", details)
            }
            EngineError::ConfigUnsupported { details } => {
                format!("No supported stream configuration: {}", details)
            }
            EngineError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            EngineError::StreamDisconnected { details } => {
                format!("Audio stream disconnected: {}", details)
            }
            EngineError::InternalFault { details } => {
                format!("Internal audio fault: {}", details)
            }
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::InternalFault {
            details: err.to_string(),
        }
    }
}

// Public API for the hosting application
// Process-wide passthrough engine and the start/stop boundary the bridge calls

use once_cell::sync::Lazy;

use crate::config::AppConfig;
use crate::engine::{EngineState, PassthroughEngine};
use crate::error::{EngineError, ErrorCode};

/// The single engine instance for this process
///
/// Created on first use with the platform backend and platform config, then
/// started and stopped any number of times. Never constructed twice.
static ENGINE: Lazy<PassthroughEngine> = Lazy::new(|| {
    let config = AppConfig::load_platform();
    PassthroughEngine::with_platform_defaults(config)
});

/// The process-wide engine
pub fn engine() -> &'static PassthroughEngine {
    &ENGINE
}

/// Start live passthrough
///
/// Idempotent: returns `Ok` without reopening anything while the engine is
/// already starting, running or stopping.
///
/// The caller must have confirmed microphone permission and must keep the
/// hosting process alive (foreground service) until `stop_passthrough`.
///
/// # Errors
/// - `DeviceUnavailable` / `PermissionDenied`: retry may succeed later
/// - `ConfigUnsupported`: no stream configuration could be opened
/// - `InternalFault`: unexpected platform failure
pub fn start_passthrough() -> Result<(), EngineError> {
    ENGINE.start()
}

/// Stop live passthrough
///
/// Always succeeds from the caller's point of view and leaves the engine
/// Idle, including after a fault.
pub fn stop_passthrough() {
    ENGINE.stop()
}

pub fn current_state() -> EngineState {
    ENGINE.current_state()
}

pub fn last_error() -> Option<EngineError> {
    ENGINE.last_error()
}

/// Numeric code of the last error, `0` when there is none
pub fn last_error_code() -> i32 {
    error_code(last_error().as_ref())
}

fn error_code(err: Option<&EngineError>) -> i32 {
    err.map_or(0, |err| err.code())
}

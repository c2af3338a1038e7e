// Oboe Passthrough - Rust Audio Engine
// Real-time duplex microphone-to-speaker passthrough with a lock-free frame ring

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;

#[cfg(target_os = "android")]
mod jni_bridge;

// Re-exports for convenience
pub use api::{current_state, last_error, start_passthrough, stop_passthrough};
pub use audio::{FrameRingBuffer, SampleFormat, StreamConfig};
pub use config::AppConfig;
pub use engine::{DeviceStreamFactory, DuplexConfig, EngineState, PassthroughEngine};
pub use error::{EngineError, ErrorCode};
pub use telemetry::{EngineEvent, EngineEventKind, EngineStats};

use once_cell::sync::OnceCell;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the process-wide tracing subscriber.
///
/// Android sends records to logcat under the `OboePassthrough` tag; other
/// platforms print to stderr filtered by `RUST_LOG` (default `info`). `log`
/// records from the library are bridged into tracing. Safe to call more than
/// once.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        cfg_if::cfg_if! {
            if #[cfg(target_os = "android")] {
                let result = match tracing_android::layer("OboePassthrough") {
                    Ok(layer) => tracing_subscriber::registry().with(filter).with(layer).try_init(),
                    Err(_) => tracing_subscriber::registry()
                        .with(filter)
                        .with(tracing_subscriber::fmt::layer())
                        .try_init(),
                };
            } else {
                let result = tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_target(false))
                    .try_init();
            }
        }

        // Another subscriber was installed by the host; keep it.
        if result.is_err() {
            log::debug!("global subscriber already set");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}

//! Engine module housing the passthrough core.
//!
//! `backend` holds the platform seam (`DeviceStreamFactory`), `negotiation`
//! the fallback walk that produces a duplex pair, and `core` the
//! `PassthroughEngine` state machine that owns it.

pub mod backend;
pub mod core;
mod fault;
pub mod negotiation;
pub mod state;

#[cfg(target_os = "android")]
pub use backend::OboeStreamFactory;
#[cfg(not(target_os = "android"))]
pub use backend::CpalStreamFactory;
pub use backend::{platform_factory, AudioStreamHandle, DeviceStreamFactory, StubStreamFactory};
pub use core::PassthroughEngine;
pub use negotiation::DuplexConfig;
pub use state::EngineState;

//! Lifecycle event types published by the engine to observers on the
//! control side (bridge, CLI).

use serde::{Deserialize, Serialize};

use crate::engine::negotiation::DuplexConfig;
use crate::error::{EngineError, ErrorCode};

/// Lifecycle transition reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEventKind {
    Started { config: DuplexConfig },
    StartFailed { code: i32, message: String },
    Stopped,
    Faulted { code: i32, message: String },
}

impl EngineEventKind {
    pub(crate) fn start_failed(err: &EngineError) -> Self {
        EngineEventKind::StartFailed {
            code: err.code(),
            message: err.message(),
        }
    }

    pub(crate) fn faulted(err: &EngineError) -> Self {
        EngineEventKind::Faulted {
            code: err.code(),
            message: err.message(),
        }
    }
}

/// Timestamped lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    /// Milliseconds since the engine was constructed
    pub timestamp_ms: u64,
    pub kind: EngineEventKind,
}

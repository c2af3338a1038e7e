//! Engine lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the passthrough engine.
///
/// `Running` is the only state in which native stream handles are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    /// A start attempt failed or a running stream reported a terminal error.
    Faulted,
}

impl EngineState {
    /// Stable integer form for the JNI boundary.
    pub fn as_code(self) -> i32 {
        match self {
            EngineState::Idle => 0,
            EngineState::Starting => 1,
            EngineState::Running => 2,
            EngineState::Stopping => 3,
            EngineState::Faulted => 4,
        }
    }

    /// States in which `start()` is a successful no-op
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Running | EngineState::Stopping
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

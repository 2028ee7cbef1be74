//! Lifecycle management for the external ffmpeg-family processes.
//!
//! Each streaming function is a `Role` backed by exactly one OS process at a
//! time. `handle` wraps the spawned child, `terminate` implements the
//! two-phase stop protocol, and `supervisor` owns one role's state machine.

pub mod handle;
pub mod supervisor;
pub mod terminate;

pub use handle::{ExitInfo, ProcHandle};
pub use supervisor::{ExitNotice, RoleState, RoleSupervisor, StartOutcome, StopDisposition};
pub use terminate::StopOutcome;

use serde::{Deserialize, Serialize};

/// One externally-visible streaming function, plus the internal probe used
/// by the bitrate monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Receive,
    Record,
    Send,
    Play,
    Probe,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Record => "record",
            Self::Send => "send",
            Self::Play => "play",
            Self::Probe => "probe",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{role} command line is empty")]
    EmptyCommand { role: Role },

    #[error("failed to spawn {role} process: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} process is still alive after forced kill")]
    Termination { role: Role },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::Receive.as_str(), "receive");
        assert_eq!(Role::Record.as_str(), "record");
        assert_eq!(Role::Send.as_str(), "send");
        assert_eq!(Role::Play.as_str(), "play");
        assert_eq!(Role::Probe.as_str(), "probe");
    }

    #[test]
    fn test_process_error_messages() {
        let err = ProcessError::EmptyCommand { role: Role::Play };
        assert_eq!(err.to_string(), "play command line is empty");

        let err = ProcessError::Termination { role: Role::Record };
        assert!(err.to_string().contains("forced kill"));
    }
}

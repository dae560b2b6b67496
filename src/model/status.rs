use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a phase on a single agent.
///
/// The variants are ordered: an agent only ever moves forward, one step at a
/// time, and the controller aggregates agents by taking the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    Running,
    Finished,
    Terminating,
    Terminated,
}

impl PhaseStatus {
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Running),
            Self::Running => Some(Self::Finished),
            Self::Finished => Some(Self::Terminating),
            Self::Terminating => Some(Self::Terminated),
            Self::Terminated => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller-side view of a phase. `Starting` and `Finishing` mark the
/// window between sending a command and hearing back from every agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerPhaseStatus {
    NotStarted,
    Starting,
    Running,
    Finishing,
    Finished,
    Terminating,
    Terminated,
}

impl ControllerPhaseStatus {
    #[must_use]
    pub const fn from_agent(status: PhaseStatus) -> Self {
        match status {
            PhaseStatus::NotStarted => Self::NotStarted,
            PhaseStatus::Running => Self::Running,
            PhaseStatus::Finished => Self::Finished,
            PhaseStatus::Terminating => Self::Terminating,
            PhaseStatus::Terminated => Self::Terminated,
        }
    }

    #[must_use]
    pub const fn is_started(self) -> bool {
        !matches!(self, Self::NotStarted)
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished | Self::Terminating | Self::Terminated)
    }

    #[must_use]
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ControllerPhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands the controller broadcasts for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseCommand {
    Run,
    Finish,
    TryTerminate,
    Terminate,
}

impl fmt::Display for PhaseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Run => "RUN",
            Self::Finish => "FINISH",
            Self::TryTerminate => "TRY_TERMINATE",
            Self::Terminate => "TERMINATE",
        };
        f.write_str(label)
    }
}

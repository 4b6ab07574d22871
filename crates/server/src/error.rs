use scenario_engine::{ScenarioError, ScenarioId};

/// Why a session request was refused.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("scenario {0} already has an active run")]
    Conflict(ScenarioId),

    #[error("scenario {0} has no active run")]
    NotRunning(ScenarioId),

    #[error(transparent)]
    Backend(#[from] ScenarioError),
}

impl SessionError {
    /// Stable identifier sent to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::Backend(ScenarioError::InvalidArgument(_)) => {
                "invalid_argument"
            }
            Self::Conflict(_) => "conflict",
            Self::NotRunning(_) => "not_running",
            Self::Backend(ScenarioError::UnknownScenario(_)) => "not_found",
            Self::Backend(_) => "backend",
        }
    }
}

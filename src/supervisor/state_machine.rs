use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of the tracked WMS service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The OS process table could not be queried reliably.
    Unknown,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(ServiceState, ServiceState),
}

pub struct StateMachine {
    pub state: ServiceState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: ServiceState::Unknown }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (&self.state, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Running)
        )
    }

    pub fn transition(&mut self, to: ServiceState) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }

    /// 실제 프로세스 테이블에서 확인한 상태로 재동기화 (전이 규칙 없음)
    pub fn observe(&mut self, observed: ServiceState) {
        if self.state != observed {
            tracing::debug!("State resync: {:?} -> {:?}", self.state, observed);
            self.state = observed;
        }
    }
}

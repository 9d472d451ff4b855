//! Supervisor 전용 에러 타입. 에러 종류를 구분하여 컨트롤 화면(CLI/UI)이
//! 적절한 메시지와 종료 코드를 고를 수 있게 합니다.

use super::pid_file::PidFileError;
use super::process::ProbeError;

/// 서비스 생명주기 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to spawn '{command}': {reason}")]
    ProcessSpawnFailed { command: String, reason: String },

    #[error("Process {pid} did not terminate within {waited_ms}ms after a forced kill")]
    TerminationTimeout { pid: u32, waited_ms: u64 },

    #[error("Permission denied for process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("Service state cannot be determined: {0}")]
    StatusUnknown(#[from] ProbeError),

    #[error(transparent)]
    PidFile(#[from] PidFileError),
}

impl SupervisorError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::ProcessSpawnFailed { .. } => "PROCESS_SPAWN_FAILED",
            Self::TerminationTimeout { .. } => "TERMINATION_TIMEOUT",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::StatusUnknown(ProbeError::PermissionDenied { .. }) => "PERMISSION_DENIED",
            Self::StatusUnknown(_) => "STATUS_UNKNOWN",
            Self::PidFile(e) => e.error_code(),
        }
    }

    /// CLI 종료 코드
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid(_) => 2,
            Self::StatusUnknown(_) | Self::PermissionDenied { .. } => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SupervisorError::TerminationTimeout { pid: 42, waited_ms: 2000 };
        assert_eq!(err.error_code(), "TERMINATION_TIMEOUT");
        assert!(err.to_string().contains("42"));

        let err = SupervisorError::from(ProbeError::PermissionDenied { pid: 7 });
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
        assert_eq!(err.exit_code(), 3);

        let err = SupervisorError::from(ProbeError::Transient { pid: 7, reason: "EAGAIN".into() });
        assert_eq!(err.error_code(), "STATUS_UNKNOWN");
    }
}

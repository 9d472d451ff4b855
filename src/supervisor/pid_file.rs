//! PID 파일: 컨트롤 화면이 재시작되어도 서비스 프로세스를 다시 찾기 위한 기록
//!
//! 형식은 JSON `{"pid": 1234, "started_at": 1700000000, "command": ["wms-server", ...]}`.
//! 모르는 필드는 무시하고, 예전 버전이 남긴 숫자 하나짜리 파일도 읽습니다
//! (이 경우 command가 비어 있으므로 신원 확인은 항상 실패합니다).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const PID_FILE_NAME: &str = "wms_service.pid";

#[derive(thiserror::Error, Debug)]
pub enum PidFileError {
    #[error("PID file '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("PID file '{path}' I/O error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PidFileError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Corrupt { .. } => "PID_FILE_CORRUPT",
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => {
                "PERMISSION_DENIED"
            }
            Self::Io { .. } => "WRITE_FAILED",
        }
    }
}

/// Identity of a process started by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Unix timestamp (seconds), 0 if unknown
    #[serde(default)]
    pub started_at: u64,
    /// Full argv the process was launched with
    #[serde(default)]
    pub command: Vec<String>,
}

impl ProcessRecord {
    pub fn new(pid: u32, command: Vec<String>) -> Self {
        Self {
            pid,
            started_at: current_timestamp(),
            command,
        }
    }

    pub fn launch_command(&self) -> String {
        self.command.join(" ")
    }
}

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 파일이 없으면 `Ok(None)`
    pub fn read(&self) -> Result<Option<ProcessRecord>, PidFileError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidFileError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let trimmed = raw.trim();
        if let Ok(pid) = trimmed.parse::<u32>() {
            tracing::debug!("Legacy PID file format detected (pid {})", pid);
            return Ok(Some(ProcessRecord {
                pid,
                started_at: 0,
                command: Vec::new(),
            }));
        }

        serde_json::from_str::<ProcessRecord>(trimmed)
            .map(Some)
            .map_err(|e| PidFileError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// 임시 파일에 쓴 뒤 rename. 반쯤 쓰인 PID 파일이 남지 않도록
    pub fn write(&self, record: &ProcessRecord) -> Result<(), PidFileError> {
        let io_err = |source: std::io::Error| PidFileError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(|e| io_err(e.into()))?;
        let tmp = self.path.with_extension("pid.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        tracing::debug!("Wrote PID file {} (pid {})", self.path.display(), record.pid);
        Ok(())
    }

    /// 이미 없으면 성공
    pub fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed PID file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidFileError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

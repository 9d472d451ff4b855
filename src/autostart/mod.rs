//! Auto-start at user logon.
//!
//! The registrar only knows the narrow [`TaskScheduler`] capability
//! (`register`, `unregister`, `exists`, plus an optional `run`). Backends:
//! - Windows: Task Scheduler via `schtasks`
//! - Linux: XDG autostart entry (`~/.config/autostart/*.desktop`)
//! - everything else: [`UnsupportedScheduler`]

mod schtasks;
mod xdg;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::supervisor::{ProcessRecord, ProcessSupervisor, SupervisorError};

pub use schtasks::WindowsTaskScheduler;
pub use xdg::XdgAutostart;

pub const DEFAULT_TASK_NAME: &str = "WMSServiceAutoStart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    UserLogon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoStartTaskDescriptor {
    pub task_name: String,
    pub trigger: Trigger,
    /// Launcher script the task runs.
    pub command: PathBuf,
}

impl AutoStartTaskDescriptor {
    pub fn at_logon(task_name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            task_name: task_name.into(),
            trigger: Trigger::UserLogon,
            command: command.into(),
        }
    }
}

/// Backend-level failure.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("auto-start is not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("invalid task: {0}")]
    InvalidDescriptor(String),

    #[error("'{program}' failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// `io::ErrorKind::PermissionDenied`는 PermissionDenied로 승격
    pub(crate) fn from_io(e: std::io::Error, context: &str) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(format!("{}: {}", context, e))
        } else {
            Self::Io(e)
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AutoStartError {
    #[error("Failed to register auto-start task '{task}': {source}")]
    RegistrationFailed {
        task: String,
        #[source]
        source: SchedulerError,
    },

    #[error("Failed to remove auto-start task '{task}': {source}")]
    RemovalFailed {
        task: String,
        #[source]
        source: SchedulerError,
    },

    #[error("Auto-start task '{0}' is not registered")]
    NotRegistered(String),

    #[error("Failed to run auto-start task '{task}': {source}")]
    RunFailed {
        task: String,
        #[source]
        source: SchedulerError,
    },

    #[error(transparent)]
    Launch(#[from] SupervisorError),
}

impl AutoStartError {
    fn scheduler_error(&self) -> Option<&SchedulerError> {
        match self {
            Self::RegistrationFailed { source, .. }
            | Self::RemovalFailed { source, .. }
            | Self::RunFailed { source, .. } => Some(source),
            Self::NotRegistered(_) | Self::Launch(_) => None,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.scheduler_error(), Some(SchedulerError::PermissionDenied(_)))
    }

    pub fn error_code(&self) -> &'static str {
        match self.scheduler_error() {
            Some(SchedulerError::PermissionDenied(_)) => "PERMISSION_DENIED",
            Some(SchedulerError::UnsupportedPlatform(_)) => "UNSUPPORTED_PLATFORM",
            _ => match self {
                Self::RegistrationFailed { .. } => "AUTOSTART_REGISTRATION_FAILED",
                Self::RemovalFailed { .. } => "AUTOSTART_REMOVAL_FAILED",
                Self::NotRegistered(_) => "AUTOSTART_NOT_REGISTERED",
                Self::RunFailed { .. } => "AUTOSTART_RUN_FAILED",
                Self::Launch(e) => e.error_code(),
            },
        }
    }
}

/// OS scheduled-task capability.
pub trait TaskScheduler: Send + Sync {
    /// Create or replace the entry named `descriptor.task_name`.
    fn register(&self, descriptor: &AutoStartTaskDescriptor) -> Result<(), SchedulerError>;

    /// Remove the entry; succeeds if it does not exist.
    fn unregister(&self, task_name: &str) -> Result<(), SchedulerError>;

    fn exists(&self, task_name: &str) -> Result<bool, SchedulerError>;

    /// Launch the registered entry now.
    fn run(&self, _task_name: &str) -> Result<(), SchedulerError> {
        Err(SchedulerError::UnsupportedPlatform(std::env::consts::OS))
    }

    fn backend(&self) -> &'static str;
}

/// Stub for platforms without a supported logon facility.
pub struct UnsupportedScheduler;

impl TaskScheduler for UnsupportedScheduler {
    fn register(&self, _descriptor: &AutoStartTaskDescriptor) -> Result<(), SchedulerError> {
        Err(SchedulerError::UnsupportedPlatform(std::env::consts::OS))
    }

    fn unregister(&self, _task_name: &str) -> Result<(), SchedulerError> {
        Err(SchedulerError::UnsupportedPlatform(std::env::consts::OS))
    }

    fn exists(&self, _task_name: &str) -> Result<bool, SchedulerError> {
        Err(SchedulerError::UnsupportedPlatform(std::env::consts::OS))
    }

    fn backend(&self) -> &'static str {
        "unsupported"
    }
}

/// 현재 OS에 맞는 스케줄러 선택
pub fn native_scheduler() -> Box<dyn TaskScheduler> {
    if cfg!(target_os = "windows") {
        return Box::new(WindowsTaskScheduler::new());
    }
    if cfg!(target_os = "linux") {
        match XdgAutostart::from_env() {
            Some(xdg) => return Box::new(xdg),
            None => tracing::warn!("Neither XDG_CONFIG_HOME nor HOME is set, auto-start unavailable"),
        }
    }
    Box::new(UnsupportedScheduler)
}

pub struct AutoStartRegistrar {
    scheduler: Box<dyn TaskScheduler>,
}

impl AutoStartRegistrar {
    pub fn new(scheduler: Box<dyn TaskScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn native() -> Self {
        Self::new(native_scheduler())
    }

    pub fn backend(&self) -> &'static str {
        self.scheduler.backend()
    }

    /// Idempotent create-or-replace.
    pub fn enable(&self, descriptor: &AutoStartTaskDescriptor) -> Result<(), AutoStartError> {
        let task = descriptor.task_name.clone();
        tracing::info!("Attempting to enable auto-start (Task: {})...", task);

        let result = if task.trim().is_empty() {
            Err(SchedulerError::InvalidDescriptor("task name is empty".to_string()))
        } else if !descriptor.command.is_file() {
            Err(SchedulerError::InvalidDescriptor(format!(
                "launcher script '{}' does not exist",
                descriptor.command.display()
            )))
        } else {
            self.scheduler.register(descriptor)
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    "Successfully enabled auto-start task '{}' ({}) -> {}",
                    task,
                    self.scheduler.backend(),
                    descriptor.command.display()
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!("Failed to enable auto-start task '{}': {}", task, source);
                Err(AutoStartError::RegistrationFailed { task, source })
            }
        }
    }

    /// Idempotent; succeeds when no entry exists.
    pub fn disable(&self, task_name: &str) -> Result<(), AutoStartError> {
        tracing::info!("Attempting to disable auto-start (Task: {})...", task_name);
        if let Ok(false) = self.scheduler.exists(task_name) {
            tracing::info!("Task '{}' not found or already deleted", task_name);
            return Ok(());
        }
        self.scheduler.unregister(task_name).map_err(|source| {
            tracing::error!("Failed to disable auto-start task '{}': {}", task_name, source);
            AutoStartError::RemovalFailed {
                task: task_name.to_string(),
                source,
            }
        })?;
        tracing::info!("Successfully disabled auto-start task '{}'", task_name);
        Ok(())
    }

    pub fn is_enabled(&self, task_name: &str) -> bool {
        match self.scheduler.exists(task_name) {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Error checking task '{}': {}", task_name, e);
                false
            }
        }
    }

    /// "Run now" through the registered entry.
    pub fn run_now(&self, task_name: &str) -> Result<(), AutoStartError> {
        if !self.is_enabled(task_name) {
            return Err(AutoStartError::NotRegistered(task_name.to_string()));
        }
        self.scheduler.run(task_name).map_err(|source| {
            tracing::error!("Failed to run task '{}': {}", task_name, source);
            AutoStartError::RunFailed {
                task: task_name.to_string(),
                source,
            }
        })?;
        tracing::info!("Triggered auto-start task '{}'", task_name);
        Ok(())
    }

    /// "Run now" for a registered entry, launched through the supervisor so the
    /// process gets a PID record and `status`/`stop` can see it.
    ///
    /// [`run_now`](Self::run_now) goes through the OS facility instead; the
    /// service it launches is not tracked.
    pub fn run_tracked(
        &self,
        task_name: &str,
        supervisor: &ProcessSupervisor,
        config: &ServiceConfig,
    ) -> Result<ProcessRecord, AutoStartError> {
        if !self.is_enabled(task_name) {
            return Err(AutoStartError::NotRegistered(task_name.to_string()));
        }
        tracing::info!("Running auto-start task '{}' through the supervisor", task_name);
        Ok(supervisor.start(config)?)
    }
}

//! Service lifecycle supervisor.
//!
//! The supervisor never trusts the PID file on its own: every status query
//! re-reads it, probes the OS process table and cross-checks the recorded
//! command line (or start time) before calling the service `Running`.

pub mod error;
pub mod pid_file;
pub mod process;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::launcher::ServerCommand;

pub use error::SupervisorError;
pub use pid_file::{PidFile, PidFileError, ProcessRecord};
pub use process::{ProbeError, ProcessControl, ProcessError, ProcessSnapshot, SystemProcesses};
pub use state_machine::{ServiceState, StateMachine};

/// 기록된 시작 시각과 OS가 보고한 시작 시각의 허용 오차
const START_TIME_TOLERANCE_SECS: u64 = 5;
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How long to wait after the graceful signal before escalating.
    pub graceful_timeout: Duration,
    /// How long to wait after the forceful kill before giving up.
    pub kill_timeout: Duration,
    /// Interval between liveness checks while waiting for an exit.
    pub poll_step: Duration,
    /// Settle time after spawn before confirming the process stayed up.
    pub startup_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(2),
            poll_step: Duration::from_millis(100),
            startup_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; no signal was sent.
    AlreadyStopped,
    /// Exited after the graceful signal.
    Graceful,
    /// Needed the forceful kill.
    Forced,
}

/// Presentation-friendly view of the current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub started_at: Option<u64>,
    pub command: Option<String>,
    /// Why the state is `Unknown`, or why a record is considered stale.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Identity {
    Match,
    Mismatch,
    Unverifiable,
}

/// PID 재사용 방지: PID만 같고 다른 프로그램이면 Mismatch
pub(crate) fn verify_identity(record: &ProcessRecord, snapshot: &ProcessSnapshot) -> Identity {
    // 커맨드가 없는 레코드(구버전 정수 PID 파일)는 우리 프로세스임을 증명할 수 없음
    if record.command.is_empty() {
        return Identity::Mismatch;
    }
    if !snapshot.cmd.is_empty() {
        return if commands_match(&record.command, &snapshot.cmd) {
            Identity::Match
        } else {
            Identity::Mismatch
        };
    }
    if record.started_at > 0 && snapshot.start_time > 0 {
        return if record.started_at.abs_diff(snapshot.start_time) <= START_TIME_TOLERANCE_SECS {
            Identity::Match
        } else {
            Identity::Mismatch
        };
    }
    Identity::Unverifiable
}

/// argv[0]은 파일 이름(확장자 제외)만 비교. OS가 절대 경로로 보고하는 경우가 있음
fn commands_match(recorded: &[String], observed: &[String]) -> bool {
    let (Some((rec_prog, rec_args)), Some((obs_prog, obs_args))) =
        (recorded.split_first(), observed.split_first())
    else {
        return false;
    };
    program_stem(rec_prog) == program_stem(obs_prog) && rec_args == obs_args
}

fn program_stem(program: &str) -> String {
    // 현재 OS와 무관하게 '/'와 '\\' 모두 경로 구분자로 취급
    let name = program
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(program);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    stem.to_lowercase()
}

/// Result of re-deriving the service state from the PID file and the OS.
#[derive(Debug)]
enum Resolved {
    NoRecord,
    Live(ProcessRecord),
    Stale { pid: Option<u32>, reason: String },
    Unknown { record: Option<ProcessRecord>, cause: SupervisorError },
}

impl Resolved {
    fn state(&self) -> ServiceState {
        match self {
            Self::NoRecord | Self::Stale { .. } => ServiceState::Stopped,
            Self::Live(_) => ServiceState::Running,
            Self::Unknown { .. } => ServiceState::Unknown,
        }
    }
}

/// Owns the lifecycle of the single tracked WMS service process.
///
/// One instance per control-surface run, shared via `Arc`. `start`, `stop`
/// and `restart` serialize on an internal lock; `status` never takes it.
pub struct ProcessSupervisor {
    pid_file: PidFile,
    server: ServerCommand,
    control: Arc<dyn ProcessControl>,
    options: SupervisorOptions,
    transition: Mutex<()>,
    machine: Mutex<StateMachine>,
}

impl ProcessSupervisor {
    pub fn new(pid_file: impl Into<PathBuf>, server: ServerCommand) -> Self {
        Self::with_control(pid_file, server, Arc::new(SystemProcesses::new()))
    }

    pub fn with_control(
        pid_file: impl Into<PathBuf>,
        server: ServerCommand,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            pid_file: PidFile::new(pid_file),
            server,
            control,
            options: SupervisorOptions::default(),
            transition: Mutex::new(()),
            machine: Mutex::new(StateMachine::new()),
        }
    }

    pub fn with_options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pid_file(&self) -> &Path {
        self.pid_file.path()
    }

    pub fn server(&self) -> &ServerCommand {
        &self.server
    }

    // ─── Locks ───────────────────────────────────────────────

    /// 보호 대상 데이터가 없는 락이므로 poison 상태여도 그대로 복구
    pub(crate) fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(|e| {
            tracing::warn!("Transition lock poisoned by an earlier panic, recovering");
            e.into_inner()
        })
    }

    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, to: ServiceState) {
        let mut machine = self.machine();
        if let Err(e) = machine.transition(to) {
            tracing::warn!("{}, resyncing", e);
            machine.observe(to);
        }
    }

    fn observe(&self, state: ServiceState) {
        self.machine().observe(state);
    }

    /// Last lifecycle phase seen by this supervisor, including the transient
    /// `Starting`/`Stopping`. Does not touch the OS.
    pub fn phase(&self) -> ServiceState {
        self.machine().state
    }

    // ─── Status ──────────────────────────────────────────────

    fn probe_with_retry(&self, pid: u32) -> Result<Option<ProcessSnapshot>, ProbeError> {
        match self.control.probe(pid) {
            Err(first) => {
                tracing::debug!("Probe of {} failed ({}), retrying once", pid, first);
                std::thread::sleep(PROBE_RETRY_DELAY);
                self.control.probe(pid)
            }
            ok => ok,
        }
    }

    fn resolve(&self) -> Resolved {
        let record = match self.pid_file.read() {
            Ok(Some(record)) => record,
            Ok(None) => return Resolved::NoRecord,
            Err(e @ PidFileError::Corrupt { .. }) => {
                return Resolved::Stale {
                    pid: None,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                return Resolved::Unknown {
                    record: None,
                    cause: e.into(),
                }
            }
        };

        let snapshot = match self.probe_with_retry(record.pid) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return Resolved::Stale {
                    pid: Some(record.pid),
                    reason: format!("process {} is no longer running", record.pid),
                }
            }
            Err(e) => {
                return Resolved::Unknown {
                    record: Some(record),
                    cause: e.into(),
                }
            }
        };

        match verify_identity(&record, &snapshot) {
            Identity::Match => Resolved::Live(record),
            Identity::Mismatch => Resolved::Stale {
                pid: Some(record.pid),
                reason: format!(
                    "pid {} now belongs to an unrelated process ({})",
                    record.pid, snapshot.name
                ),
            },
            Identity::Unverifiable => Resolved::Unknown {
                cause: ProbeError::Transient {
                    pid: record.pid,
                    reason: "neither command line nor start time could be read".to_string(),
                }
                .into(),
                record: Some(record),
            },
        }
    }

    /// Side-effect-free re-derivation of the current state.
    pub fn status(&self) -> ServiceState {
        self.resolve().state()
    }

    /// Like [`status`](Self::status), but returns `None` instead of waiting
    /// while a start/stop/restart is in progress.
    pub fn try_status(&self) -> Option<ServiceState> {
        let _guard = match self.transition.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => return None,
            Err(std::sync::TryLockError::Poisoned(e)) => e.into_inner(),
        };
        Some(self.status())
    }

    pub fn report(&self) -> StatusReport {
        let resolved = self.resolve();
        let state = resolved.state();
        match resolved {
            Resolved::NoRecord => StatusReport {
                state,
                pid: None,
                started_at: None,
                command: None,
                detail: None,
            },
            Resolved::Live(record) => StatusReport {
                state,
                pid: Some(record.pid),
                started_at: Some(record.started_at).filter(|t| *t > 0),
                command: Some(record.launch_command()),
                detail: None,
            },
            Resolved::Stale { pid, reason } => StatusReport {
                state,
                pid: None,
                started_at: None,
                command: None,
                detail: Some(match pid {
                    Some(pid) => format!("stale PID record for {}: {}", pid, reason),
                    None => format!("stale PID record: {}", reason),
                }),
            },
            Resolved::Unknown { record, cause } => StatusReport {
                state,
                pid: record.as_ref().map(|r| r.pid),
                started_at: record.as_ref().map(|r| r.started_at).filter(|t| *t > 0),
                command: record.as_ref().map(|r| r.launch_command()),
                detail: Some(cause.to_string()),
            },
        }
    }

    /// The PID record, only if it is verified to belong to a live service.
    pub fn record(&self) -> Option<ProcessRecord> {
        match self.resolve() {
            Resolved::Live(record) => Some(record),
            _ => None,
        }
    }

    fn discard_stale(&self, pid: Option<u32>, reason: &str) -> Result<(), SupervisorError> {
        match pid {
            Some(pid) => tracing::warn!("Discarding stale PID record for {}: {}", pid, reason),
            None => tracing::warn!("Discarding stale PID record: {}", reason),
        }
        self.pid_file.remove().map_err(|e| {
            tracing::error!("Failed to remove stale PID file: {}", e);
            e.into()
        })
    }

    // ─── Lifecycle ───────────────────────────────────────────

    /// Start the service; succeeds without spawning if it is already running.
    pub fn start(&self, config: &ServiceConfig) -> Result<ProcessRecord, SupervisorError> {
        let _guard = self.lock_transitions();
        self.start_locked(config)
    }

    /// Stop the service; succeeds without signalling if nothing is running.
    pub fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let _guard = self.lock_transitions();
        self.stop_locked()
    }

    /// `stop` then `start` under a single lock hold. A failed stop aborts.
    pub fn restart(&self, config: &ServiceConfig) -> Result<ProcessRecord, SupervisorError> {
        let _guard = self.lock_transitions();
        tracing::info!("Restarting WMS service");
        self.stop_locked()?;
        self.start_locked(config)
    }

    fn start_locked(&self, config: &ServiceConfig) -> Result<ProcessRecord, SupervisorError> {
        config.validate().map_err(|e| {
            tracing::error!("Refusing to start: {}", e);
            SupervisorError::ConfigInvalid(e.to_string())
        })?;

        let resolved = self.resolve();
        self.observe(resolved.state());
        match resolved {
            Resolved::Live(record) => {
                tracing::info!("WMS service already running (pid {}), not starting another", record.pid);
                return Ok(record);
            }
            Resolved::Unknown { cause, .. } => {
                tracing::error!("Refusing to start while service state is unknown: {}", cause);
                return Err(cause);
            }
            Resolved::Stale { pid, reason } => self.discard_stale(pid, &reason)?,
            Resolved::NoRecord => {}
        }

        self.advance(ServiceState::Starting);
        let argv = self.server.argv(config);
        let command = argv.join(" ");
        tracing::info!("Executing command: {}", command);

        let pid = match self.control.spawn(&argv, &self.server.working_dir) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::error!("Failed to start WMS service: {}", e);
                self.advance(ServiceState::Stopped);
                return Err(SupervisorError::ProcessSpawnFailed {
                    command,
                    reason: e.to_string(),
                });
            }
        };

        let record = ProcessRecord::new(pid, argv);
        if let Err(e) = self.pid_file.write(&record) {
            // 기록하지 못한 프로세스는 다음 실행에서 찾을 수 없으므로 정리
            tracing::error!("Failed to persist PID file, killing untracked process {}: {}", pid, e);
            if let Err(kill_err) = self.control.kill(pid) {
                tracing::error!("Failed to kill untracked process {}: {}", pid, kill_err);
            }
            self.advance(ServiceState::Stopped);
            return Err(e.into());
        }

        if !self.options.startup_grace.is_zero() {
            std::thread::sleep(self.options.startup_grace);
        }
        match self.probe_with_retry(pid) {
            Ok(None) => {
                tracing::error!("WMS service (pid {}) exited during startup", pid);
                self.pid_file.remove()?;
                self.advance(ServiceState::Stopped);
                return Err(SupervisorError::ProcessSpawnFailed {
                    command,
                    reason: "process exited immediately after launch".to_string(),
                });
            }
            Ok(Some(_)) => {}
            Err(e) => tracing::warn!("Could not confirm startup of pid {}: {}", pid, e),
        }

        self.advance(ServiceState::Running);
        tracing::info!("WMS service started successfully with PID: {}", pid);
        Ok(record)
    }

    fn stop_locked(&self) -> Result<StopOutcome, SupervisorError> {
        let resolved = self.resolve();
        self.observe(resolved.state());
        let record = match resolved {
            Resolved::NoRecord => {
                tracing::info!("WMS service is not running, nothing to stop");
                return Ok(StopOutcome::AlreadyStopped);
            }
            Resolved::Stale { pid, reason } => {
                self.discard_stale(pid, &reason)?;
                return Ok(StopOutcome::AlreadyStopped);
            }
            Resolved::Unknown { cause, .. } => {
                // 확인되지 않은 PID에는 시그널을 보내지 않음
                tracing::error!("Refusing to signal an unverified process: {}", cause);
                return Err(cause);
            }
            Resolved::Live(record) => record,
        };

        let pid = record.pid;
        self.advance(ServiceState::Stopping);
        tracing::info!("Stopping WMS service (pid {})", pid);

        match self.control.terminate(pid) {
            Ok(()) | Err(ProcessError::NotFound { .. }) => {}
            Err(e) => tracing::warn!("Graceful termination of {} failed: {}", pid, e),
        }
        if self.wait_for_exit(&record, self.options.graceful_timeout) {
            self.finish_stop(pid)?;
            return Ok(StopOutcome::Graceful);
        }

        tracing::warn!(
            "WMS service (pid {}) still running after {:?}, forcing kill",
            pid,
            self.options.graceful_timeout
        );
        match self.control.kill(pid) {
            Ok(()) | Err(ProcessError::NotFound { .. }) => {}
            Err(ProcessError::PermissionDenied { .. }) => {
                tracing::error!("Permission denied killing WMS service (pid {})", pid);
                self.advance(ServiceState::Running);
                return Err(SupervisorError::PermissionDenied { pid });
            }
            Err(e) => tracing::error!("Forced kill of {} failed: {}", pid, e),
        }
        if self.wait_for_exit(&record, self.options.kill_timeout) {
            self.finish_stop(pid)?;
            return Ok(StopOutcome::Forced);
        }

        tracing::error!("WMS service (pid {}) survived a forced kill", pid);
        self.advance(ServiceState::Running);
        Err(SupervisorError::TerminationTimeout {
            pid,
            waited_ms: self.options.kill_timeout.as_millis() as u64,
        })
    }

    /// `true` once the recorded process is gone (or its PID was reused).
    fn wait_for_exit(&self, record: &ProcessRecord, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.control.probe(record.pid) {
                Ok(None) => return true,
                Ok(Some(snapshot)) if verify_identity(record, &snapshot) == Identity::Mismatch => {
                    return true
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::debug!("Probe of {} failed while waiting: {}", record.pid, e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.options.poll_step);
        }
    }

    fn finish_stop(&self, pid: u32) -> Result<(), SupervisorError> {
        self.pid_file.remove()?;
        self.advance(ServiceState::Stopped);
        tracing::info!("WMS service (pid {}) stopped", pid);
        Ok(())
    }
}

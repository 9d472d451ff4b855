use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub use crate::process_monitor::ProcessSnapshot;

/// A liveness probe that could not produce an answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("permission denied while probing process {pid}")]
    PermissionDenied { pid: u32 },
    #[error("process table query for {pid} failed: {reason}")]
    Transient { pid: u32, reason: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("permission denied for process {pid}")]
    PermissionDenied { pid: u32 },
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
}

/// OS operations the supervisor needs. [`SystemProcesses`] is the real one.
pub trait ProcessControl: Send + Sync {
    /// Spawn `argv` detached from the caller and return its PID.
    fn spawn(&self, argv: &[String], working_dir: &Path) -> std::io::Result<u32>;

    /// `Ok(None)` means the PID is not alive.
    fn probe(&self, pid: u32) -> Result<Option<ProcessSnapshot>, ProbeError>;

    /// Graceful termination request (SIGTERM / close request).
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Forceful kill (SIGKILL / TerminateProcess).
    fn kill(&self, pid: u32) -> Result<(), ProcessError>;
}

/// Real process control backed by the OS.
///
/// Children spawned in this run are kept so they can be reaped once they
/// exit; otherwise they would linger as zombies until the control surface
/// itself exits.
#[derive(Default)]
pub struct SystemProcesses {
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    fn children(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        self.children.lock().unwrap_or_else(|e| {
            tracing::warn!("SystemProcesses lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// `true` if `pid` is our own child and has already exited.
    fn reap(&self, pid: u32) -> bool {
        let mut children = self.children();
        let exited = match children.get_mut(&pid) {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!("Service process {} exited with {}", pid, status);
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    tracing::debug!("try_wait on {} failed: {}", pid, e);
                    false
                }
            },
            None => false,
        };
        if exited {
            children.remove(&pid);
        }
        exited
    }
}

/// PID 0과 i32 범위를 넘는 값은 프로세스 그룹/전체 시그널로 해석되므로 거부
fn signalable(pid: u32) -> bool {
    pid != 0 && pid <= i32::MAX as u32
}

impl ProcessControl for SystemProcesses {
    fn spawn(&self, argv: &[String], working_dir: &Path) -> std::io::Result<u32> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        crate::utils::detach(&mut cmd);

        let child = cmd.spawn()?;
        let pid = child.id();
        self.children().insert(pid, child);
        Ok(pid)
    }

    fn probe(&self, pid: u32) -> Result<Option<ProcessSnapshot>, ProbeError> {
        if !signalable(pid) || self.reap(pid) {
            return Ok(None);
        }

        // kill(pid, 0)으로 먼저 존재/권한 확인 (sysinfo는 권한 오류를 구분하지 못함)
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal;
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(pid as i32), None) {
                Ok(()) => {}
                Err(Errno::ESRCH) => return Ok(None),
                Err(Errno::EPERM) => return Err(ProbeError::PermissionDenied { pid }),
                Err(e) => {
                    return Err(ProbeError::Transient {
                        pid,
                        reason: e.to_string(),
                    })
                }
            }
        }

        Ok(crate::process_monitor::snapshot(pid))
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        if !signalable(pid) {
            return Err(ProcessError::NotFound { pid });
        }
        tracing::info!("Sending TERM signal to service process {}", pid);

        // /F 없이 종료 요청만 보냄
        #[cfg(target_os = "windows")]
        run_taskkill(pid, false)?;

        #[cfg(unix)]
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)?;

        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        if !signalable(pid) {
            return Err(ProcessError::NotFound { pid });
        }
        tracing::info!("Sending KILL signal to service process {}", pid);

        // 서버가 띄운 워커까지 트리째 종료, taskkill이 실패하면 본 프로세스만이라도
        #[cfg(target_os = "windows")]
        {
            if let Err(e) = run_taskkill(pid, true) {
                tracing::warn!("{}, falling back to TerminateProcess", e);
                terminate_process(pid)?;
            }
        }

        #[cfg(unix)]
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)?;

        Ok(())
    }
}

/// `taskkill` arguments. `/T` takes the child tree along; `/F` forces.
#[cfg_attr(not(windows), allow(dead_code))]
fn taskkill_args(pid: u32, force: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(4);
    if force {
        args.push("/F".to_string());
    }
    args.push("/T".to_string());
    args.push("/PID".to_string());
    args.push(pid.to_string());
    args
}

#[cfg(target_os = "windows")]
fn run_taskkill(pid: u32, force: bool) -> Result<(), ProcessError> {
    let mut cmd = Command::new("taskkill");
    cmd.args(taskkill_args(pid, force))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    crate::utils::no_window(&mut cmd);
    let status = cmd.status().map_err(|e| ProcessError::TerminationFailed {
        pid,
        reason: format!("taskkill: {}", e),
    })?;
    if !status.success() {
        return Err(ProcessError::TerminationFailed {
            pid,
            reason: format!("taskkill exited with {}", status),
        });
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn terminate_process(pid: u32) -> Result<(), ProcessError> {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return Err(ProcessError::TerminationFailed {
                pid,
                reason: format!("Failed to open process {}", pid),
            });
        }
        let result = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if result == 0 {
            return Err(ProcessError::TerminationFailed {
                pid,
                reason: "TerminateProcess failed".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn send_signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ProcessError::NotFound { pid }),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied { pid }),
        Err(e) => Err(ProcessError::TerminationFailed {
            pid,
            reason: format!("Failed to send {}: {}", sig, e),
        }),
    }
}

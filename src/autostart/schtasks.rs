//! Windows Task Scheduler backend (`schtasks.exe`).

use std::process::{Command, Stdio};

use super::{AutoStartTaskDescriptor, SchedulerError, TaskScheduler};

const PROGRAM: &str = "schtasks";

pub struct WindowsTaskScheduler {
    program: String,
}

impl Default for WindowsTaskScheduler {
    fn default() -> Self {
        Self {
            program: PROGRAM.to_string(),
        }
    }
}

impl WindowsTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn exec(&self, args: &[String]) -> Result<std::process::Output, SchedulerError> {
        tracing::info!("Executing schtasks command: {} {}", self.program, args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        crate::utils::no_window(&mut cmd);
        cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                tracing::error!("schtasks command not found. Is this a Windows environment?");
                SchedulerError::UnsupportedPlatform(std::env::consts::OS)
            } else {
                SchedulerError::from_io(e, "schtasks")
            }
        })
    }

    fn check(&self, output: std::process::Output) -> Result<String, SchedulerError> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            tracing::debug!("schtasks output: {}", stdout.trim());
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&self.program, stderr))
    }
}

/// `/TR` 값은 경로에 공백이 있어도 동작하도록 따옴표로 감쌈
pub(crate) fn create_args(descriptor: &AutoStartTaskDescriptor) -> Vec<String> {
    vec![
        "/Create".into(),
        "/TN".into(),
        descriptor.task_name.clone(),
        "/TR".into(),
        format!("\"{}\"", descriptor.command.display()),
        "/SC".into(),
        "ONLOGON".into(),
        "/RL".into(),
        "HIGHEST".into(),
        "/F".into(),
    ]
}

pub(crate) fn delete_args(task_name: &str) -> Vec<String> {
    vec!["/Delete".into(), "/TN".into(), task_name.into(), "/F".into()]
}

pub(crate) fn query_args(task_name: &str) -> Vec<String> {
    vec!["/Query".into(), "/TN".into(), task_name.into()]
}

pub(crate) fn run_args(task_name: &str) -> Vec<String> {
    vec!["/Run".into(), "/TN".into(), task_name.into()]
}

pub(crate) fn classify_failure(program: &str, stderr: String) -> SchedulerError {
    if stderr.to_lowercase().contains("access is denied") {
        SchedulerError::PermissionDenied(stderr)
    } else {
        SchedulerError::CommandFailed {
            program: program.to_string(),
            stderr,
        }
    }
}

fn is_missing_task(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("cannot find") || lower.contains("does not exist")
}

impl TaskScheduler for WindowsTaskScheduler {
    fn register(&self, descriptor: &AutoStartTaskDescriptor) -> Result<(), SchedulerError> {
        // /F: 같은 이름의 작업이 있으면 덮어씀
        let output = self.exec(&create_args(descriptor))?;
        self.check(output).map(|_| ())
    }

    fn unregister(&self, task_name: &str) -> Result<(), SchedulerError> {
        let output = self.exec(&delete_args(task_name))?;
        match self.check(output) {
            Ok(_) => Ok(()),
            Err(SchedulerError::CommandFailed { stderr, .. }) if is_missing_task(&stderr) => {
                tracing::info!("Task '{}' not found or already deleted", task_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn exists(&self, task_name: &str) -> Result<bool, SchedulerError> {
        let output = self.exec(&query_args(task_name))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).contains(task_name));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() || is_missing_task(&stderr) {
            Ok(false)
        } else {
            Err(classify_failure(&self.program, stderr))
        }
    }

    fn run(&self, task_name: &str) -> Result<(), SchedulerError> {
        let output = self.exec(&run_args(task_name))?;
        self.check(output).map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "schtasks"
    }
}

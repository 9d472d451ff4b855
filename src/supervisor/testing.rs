//! In-memory process table for supervisor and poller tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::process::{ProbeError, ProcessControl, ProcessError, ProcessSnapshot};

pub(crate) struct FakeProcesses {
    table: Mutex<HashMap<u32, Vec<String>>>,
    next_pid: AtomicU32,
    spawns: AtomicUsize,
    terminates: AtomicUsize,
    kills: AtomicUsize,
    probe_failures: AtomicUsize,
    probe_delay_ms: AtomicU64,
    fail_spawn: AtomicBool,
    exit_on_spawn: AtomicBool,
    ignore_terminate: AtomicBool,
    ignore_kill: AtomicBool,
}

impl FakeProcesses {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(1000),
            spawns: AtomicUsize::new(0),
            terminates: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            probe_failures: AtomicUsize::new(0),
            probe_delay_ms: AtomicU64::new(0),
            fail_spawn: AtomicBool::new(false),
            exit_on_spawn: AtomicBool::new(false),
            ignore_terminate: AtomicBool::new(false),
            ignore_kill: AtomicBool::new(false),
        }
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub(crate) fn terminate_count(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub(crate) fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub(crate) fn alive_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub(crate) fn is_alive(&self, pid: u32) -> bool {
        self.table.lock().unwrap().contains_key(&pid)
    }

    pub(crate) fn fail_spawn(&self, on: bool) {
        self.fail_spawn.store(on, Ordering::SeqCst);
    }

    pub(crate) fn exit_on_spawn(&self, on: bool) {
        self.exit_on_spawn.store(on, Ordering::SeqCst);
    }

    pub(crate) fn ignore_terminate(&self, on: bool) {
        self.ignore_terminate.store(on, Ordering::SeqCst);
    }

    pub(crate) fn ignore_kill(&self, on: bool) {
        self.ignore_kill.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_probes(&self, n: usize) {
        self.probe_failures.store(n, Ordering::SeqCst);
    }

    /// Every probe blocks this long, like a stalled process-table query.
    pub(crate) fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulates an external actor killing the process.
    pub(crate) fn vanish(&self, pid: u32) {
        self.table.lock().unwrap().remove(&pid);
    }

    /// A process the supervisor did not start.
    pub(crate) fn insert_foreign(&self, cmd: Vec<String>) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.table.lock().unwrap().insert(pid, cmd);
        pid
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn(&self, argv: &[String], _working_dir: &Path) -> std::io::Result<u32> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        if !self.exit_on_spawn.load(Ordering::SeqCst) {
            self.table.lock().unwrap().insert(pid, argv.to_vec());
        }
        Ok(pid)
    }

    fn probe(&self, pid: u32) -> Result<Option<ProcessSnapshot>, ProbeError> {
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let pending = self.probe_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.probe_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ProbeError::Transient {
                pid,
                reason: "simulated".into(),
            });
        }
        Ok(self.table.lock().unwrap().get(&pid).map(|cmd| ProcessSnapshot {
            pid,
            name: cmd.first().cloned().unwrap_or_default(),
            cmd: cmd.clone(),
            start_time: 0,
        }))
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        self.terminates.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_terminate.load(Ordering::SeqCst) {
            self.table
                .lock()
                .unwrap()
                .remove(&pid)
                .ok_or(ProcessError::NotFound { pid })?;
        }
        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_kill.load(Ordering::SeqCst) {
            self.table
                .lock()
                .unwrap()
                .remove(&pid)
                .ok_or(ProcessError::NotFound { pid })?;
        }
        Ok(())
    }
}

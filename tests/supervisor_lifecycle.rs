//! 실제 `/bin/sh` 프로세스를 띄워 생명주기 시나리오를 검증하는 통합 테스트
//! (Unix 전용: 시그널 동작과 `sh` 루프에 의존)
#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;

use wms_control::config::{ConfigStore, ServiceConfig, CONFIG_FILE_NAME};
use wms_control::launcher::{LauncherScript, ServerCommand};
use wms_control::poller::{PollerOptions, StatusPoller};
use wms_control::process_monitor;
use wms_control::supervisor::pid_file::PID_FILE_NAME;
use wms_control::supervisor::{
    PidFile, ProcessRecord, ProcessSupervisor, ServiceState, StopOutcome, SupervisorOptions,
};

const LOOP: &str = "while true; do sleep 1; done";
const STUBBORN_LOOP: &str = "trap '' TERM; while true; do sleep 1; done";

fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        graceful_timeout: Duration::from_millis(1500),
        kill_timeout: Duration::from_secs(3),
        poll_step: Duration::from_millis(20),
        startup_grace: Duration::from_millis(150),
    }
}

/// `sh -c <script> wms-server --host .. --port ..` 형태로 실행되는 가짜 서버
fn sh_server(script: &str, dir: &Path) -> ServerCommand {
    ServerCommand::new("sh", dir).arg("-c").arg(script).arg("wms-server")
}

fn supervisor(dir: &Path, script: &str) -> ProcessSupervisor {
    ProcessSupervisor::new(dir.join(PID_FILE_NAME), sh_server(script, dir)).with_options(fast_options())
}

/// 테스트가 끝날 때 남은 외부 프로세스 정리
struct Reaper(Child);

impl Drop for Reaper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn test_fresh_install_start_stop() {
    let dir = tempfile::tempdir().unwrap();

    // 설정 파일 없음 → 기본값
    let store = ConfigStore::open(dir.path().join(CONFIG_FILE_NAME));
    let config = store.current();
    assert_eq!(config, ServiceConfig::default());

    let sup = supervisor(dir.path(), LOOP);
    assert_eq!(sup.status(), ServiceState::Stopped);

    let record = sup.start(&config).unwrap();
    assert_eq!(sup.status(), ServiceState::Running);
    assert!(record.command.ends_with(&[
        "--host".to_string(),
        "127.0.0.1".to_string(),
        "--port".to_string(),
        "8000".to_string(),
    ]));

    let persisted = PidFile::new(dir.path().join(PID_FILE_NAME)).read().unwrap().unwrap();
    assert_eq!(persisted.pid, record.pid);
    assert_eq!(persisted.command, record.command);

    assert_eq!(sup.stop().unwrap(), StopOutcome::Graceful);
    assert_eq!(sup.status(), ServiceState::Stopped);
    assert!(!dir.path().join(PID_FILE_NAME).exists());
    assert!(!process_monitor::is_running(record.pid));
}

#[test]
fn test_start_twice_spawns_once() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), LOOP);
    let config = ServiceConfig::default();

    let first = sup.start(&config).unwrap();
    let second = sup.start(&config).unwrap();
    assert_eq!(first.pid, second.pid);
    assert_eq!(sup.status(), ServiceState::Running);

    sup.stop().unwrap();
    // 두 번째 stop은 아무 시그널 없이 성공
    assert_eq!(sup.stop().unwrap(), StopOutcome::AlreadyStopped);
}

#[test]
fn test_state_survives_control_surface_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::default();

    let record = supervisor(dir.path(), LOOP).start(&config).unwrap();

    // 새 인스턴스는 PID 파일과 OS 프로세스 테이블만으로 상태를 재구성
    let fresh = supervisor(dir.path(), LOOP);
    assert_eq!(fresh.status(), ServiceState::Running);
    assert_eq!(fresh.record().map(|r| r.pid), Some(record.pid));

    // 자식이 아닌 프로세스도 시그널로 정지 가능
    assert_eq!(fresh.stop().unwrap(), StopOutcome::Graceful);
    assert!(wait_until(Duration::from_secs(2), || !process_monitor::is_running(record.pid)));
}

#[test]
fn test_external_kill_is_never_reported_running() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), LOOP);
    let record = sup.start(&ServiceConfig::default()).unwrap();

    let status = Command::new("kill")
        .args(["-9", &record.pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    assert!(wait_until(Duration::from_secs(2), || sup.status() == ServiceState::Stopped));

    // 오래된 레코드는 다음 start에서 정리되고 새 프로세스가 뜸
    let next = sup.start(&ServiceConfig::default()).unwrap();
    assert_ne!(next.pid, record.pid);
    sup.stop().unwrap();
}

#[test]
fn test_reused_pid_is_not_adopted_or_signalled() {
    let dir = tempfile::tempdir().unwrap();
    let unrelated = Reaper(Command::new("sleep").arg("30").spawn().unwrap());
    let pid = unrelated.0.id();

    // 이전 서비스의 PID가 무관한 프로세스에 재사용된 상황
    let stale = ProcessRecord {
        pid,
        started_at: 0,
        command: vec![
            "wms-server".to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            "8000".to_string(),
        ],
    };
    let pid_file = PidFile::new(dir.path().join(PID_FILE_NAME));
    pid_file.write(&stale).unwrap();

    let sup = supervisor(dir.path(), LOOP);
    assert_eq!(sup.status(), ServiceState::Stopped);

    assert_eq!(sup.stop().unwrap(), StopOutcome::AlreadyStopped);
    assert!(!pid_file.exists());
    assert!(process_monitor::is_running(pid), "unrelated process must not be signalled");
}

#[test]
fn test_reused_pid_started_moments_ago_is_not_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let unrelated = Reaper(Command::new("sleep").arg("30").spawn().unwrap());
    let pid = unrelated.0.id();

    // 시작 시각이 허용 오차 안에 있어도 커맨드라인이 다르면 다른 프로세스
    let record = ProcessRecord::new(
        pid,
        ["wms-server", "--host", "127.0.0.1", "--port", "8000"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    PidFile::new(dir.path().join(PID_FILE_NAME)).write(&record).unwrap();

    let sup = supervisor(dir.path(), LOOP);
    assert_eq!(sup.status(), ServiceState::Stopped);

    let started = sup.start(&ServiceConfig::default()).unwrap();
    assert_ne!(started.pid, pid);
    assert!(process_monitor::is_running(pid), "unrelated process must not be signalled");
    assert_eq!(sup.stop().unwrap(), StopOutcome::Graceful);
    assert!(process_monitor::is_running(pid));
}

#[test]
fn test_legacy_pid_file_pointing_at_live_process_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let unrelated = Reaper(Command::new("sleep").arg("30").spawn().unwrap());
    let pid = unrelated.0.id();
    std::fs::write(dir.path().join(PID_FILE_NAME), format!("{}\n", pid)).unwrap();

    let sup = supervisor(dir.path(), LOOP);
    assert_eq!(sup.status(), ServiceState::Stopped);

    let started = sup.start(&ServiceConfig::default()).unwrap();
    assert_ne!(started.pid, pid);
    assert!(process_monitor::is_running(pid));
    sup.stop().unwrap();
}

#[test]
fn test_stubborn_process_is_force_killed() {
    let dir = tempfile::tempdir().unwrap();
    let sup = ProcessSupervisor::new(dir.path().join(PID_FILE_NAME), sh_server(STUBBORN_LOOP, dir.path()))
        .with_options(SupervisorOptions {
            graceful_timeout: Duration::from_millis(300),
            ..fast_options()
        });

    let record = sup.start(&ServiceConfig::default()).unwrap();
    assert_eq!(sup.stop().unwrap(), StopOutcome::Forced);
    assert_eq!(sup.status(), ServiceState::Stopped);
    assert!(!dir.path().join(PID_FILE_NAME).exists());
    assert!(!process_monitor::is_running(record.pid));
}

#[test]
fn test_immediate_exit_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), "exit 3");

    let err = sup.start(&ServiceConfig::default()).unwrap_err();
    assert_eq!(err.error_code(), "PROCESS_SPAWN_FAILED");
    assert!(!dir.path().join(PID_FILE_NAME).exists());
    assert_eq!(sup.status(), ServiceState::Stopped);
}

#[test]
fn test_missing_program_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sup = ProcessSupervisor::new(
        dir.path().join(PID_FILE_NAME),
        ServerCommand::new("definitely-not-a-wms-server-binary", dir.path()),
    )
    .with_options(fast_options());

    let err = sup.start(&ServiceConfig::default()).unwrap_err();
    assert_eq!(err.error_code(), "PROCESS_SPAWN_FAILED");
    assert_eq!(sup.status(), ServiceState::Stopped);
}

#[test]
fn test_restart_replaces_process_with_new_address() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), LOOP);

    let before = sup.start(&ServiceConfig::default()).unwrap();
    let after = sup.restart(&ServiceConfig::new("0.0.0.0", 9000)).unwrap();

    assert_ne!(before.pid, after.pid);
    assert!(after.launch_command().ends_with("--host 0.0.0.0 --port 9000"));
    assert!(wait_until(Duration::from_secs(2), || !process_monitor::is_running(before.pid)));
    sup.stop().unwrap();
}

#[test]
fn test_generated_launcher_starts_server() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let script = format!("echo \"$@\" > '{}'", marker.display());

    let path = LauncherScript::new(sh_server(&script, dir.path()))
        .generate(&ServiceConfig::new("localhost", 8123), dir.path())
        .unwrap();

    let status = Command::new(&path).status().unwrap();
    assert!(status.success());
    let args = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(args.trim(), "--host localhost --port 8123");
}

#[tokio::test]
async fn test_poller_tracks_real_process() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Arc::new(supervisor(dir.path(), LOOP));
    let poller = StatusPoller::spawn(
        sup.clone(),
        PollerOptions {
            interval: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(2),
        },
    );
    let mut rx = poller.subscribe();

    let starter = sup.clone();
    tokio::task::spawn_blocking(move || starter.start(&ServiceConfig::default()))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == Some(ServiceState::Running)),
    )
    .await
    .unwrap()
    .unwrap();

    let stopper = sup.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await.unwrap().unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == Some(ServiceState::Stopped)),
    )
    .await
    .unwrap()
    .unwrap();

    poller.shutdown().await;
}

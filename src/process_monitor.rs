use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System, UpdateKind};

/// What the OS process table reports for a single PID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    /// 프로세스 커맨드라인 인수 (권한이 없으면 비어 있을 수 있음)
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Unix timestamp (seconds), 0 if the OS did not report it
    pub start_time: u64,
}

/// 특정 PID의 스냅샷 (크로스 플랫폼)
///
/// 종료됐지만 아직 회수되지 않은 좀비 프로세스는 없는 것으로 취급합니다.
pub fn snapshot(pid: u32) -> Option<ProcessSnapshot> {
    let sys_pid = Pid::from_u32(pid);
    let mut sys = System::new();
    // 해당 PID 하나만 조회. 커맨드라인은 명시적으로 요청해야 채워짐
    let refresh = ProcessRefreshKind::new().with_cmd(UpdateKind::Always);
    if !sys.refresh_process_specifics(sys_pid, refresh) {
        return None;
    }

    let process = sys.process(sys_pid)?;
    if process.status() == ProcessStatus::Zombie {
        tracing::debug!("PID {} is a zombie, treating as exited", pid);
        return None;
    }

    Some(ProcessSnapshot {
        pid,
        name: process.name().to_string(),
        cmd: process.cmd().to_vec(),
        start_time: process.start_time(),
    })
}

/// 특정 PID가 실행 중인지 확인 (크로스 플랫폼)
pub fn is_running(pid: u32) -> bool {
    snapshot(pid).is_some()
}

/// Liveness only: can a TCP connection to `addr` be opened within `timeout`?
pub fn endpoint_reachable(addr: &str, timeout: Duration) -> bool {
    let addrs = match addr.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!("Cannot resolve {}: {}", addr, e);
            return false;
        }
    };
    addrs
        .into_iter()
        .any(|sock| TcpStream::connect_timeout(&sock, timeout).is_ok())
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo와 connect_timeout은 동기 호출이므로 tokio 워커 스레드를
// 막지 않도록 spawn_blocking으로 실행합니다.

pub async fn endpoint_reachable_async(addr: &str, timeout: Duration) -> bool {
    let addr = addr.to_string();
    tokio::task::spawn_blocking(move || endpoint_reachable(&addr, timeout))
        .await
        .unwrap_or(false)
}

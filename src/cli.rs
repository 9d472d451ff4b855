//! 컨트롤 CLI 인자 정의
//!
//! ## 사용법
//! ```text
//! wms-control status [--json]              # 서비스 상태 + 포트 응답 여부
//! wms-control start | stop | restart       # 생명주기 제어
//! wms-control config show                  # 현재 설정
//! wms-control config set --port 8080       # 설정 변경 (검증 후 저장)
//! wms-control script                       # 런처 스크립트 재생성
//! wms-control autostart enable|disable|status|run
//! wms-control watch --interval 2           # Ctrl+C까지 상태 변화 출력
//! ```
//!
//! 종료 코드: `0` 성공, `1` 실패, `2` 잘못된 설정, `3` 상태 확인 불가/권한 없음

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use wms_control::autostart::DEFAULT_TASK_NAME;
use wms_control::config::CONFIG_FILE_NAME;
use wms_control::supervisor::pid_file::PID_FILE_NAME;

/// WMS service control surface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the config file, PID file and launcher script
    #[arg(long, env = "WMS_INSTALL_DIR", default_value = ".")]
    pub install_dir: PathBuf,

    /// Config file (default: <install-dir>/service_config.json)
    #[arg(long, env = "WMS_CONFIG")]
    pub config: Option<PathBuf>,

    /// PID file (default: <install-dir>/wms_service.pid)
    #[arg(long, env = "WMS_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Server executable
    #[arg(long, env = "WMS_SERVER_PROGRAM", default_value = "wms-server")]
    pub server_program: String,

    /// Extra server argument placed before `--host/--port` (repeatable)
    #[arg(long = "server-arg", env = "WMS_SERVER_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Directory for wms_control.log (default: <install-dir>)
    #[arg(long, env = "WMS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Scheduled task name used for auto-start
    #[arg(long, env = "WMS_TASK_NAME", default_value = DEFAULT_TASK_NAME)]
    pub task_name: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.install_dir.join(CONFIG_FILE_NAME))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.install_dir.clone())
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.install_dir.join(PID_FILE_NAME))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the service state
    Status {
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Start the service (no-op if it is already running)
    Start,
    /// Stop the service (no-op if it is not running)
    Stop,
    /// Stop then start
    Restart,
    /// Show or change the service config
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage the logon auto-start task
    #[command(subcommand)]
    Autostart(AutostartCommand),
    /// Poll the status until Ctrl+C, printing every change
    Watch {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Regenerate the launcher script
    Script,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    Set(ConfigSetArgs),
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub locale: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum AutostartCommand {
    /// Write the launcher script and register it to run at logon
    Enable,
    Disable,
    Status,
    /// Run the registered task now
    Run,
}

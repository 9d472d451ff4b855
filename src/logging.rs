//! 로그 초기화: stderr + install 디렉토리의 영구 로그 파일
//!
//! `wms-control`은 짧게 실행되고 끝나는 CLI이므로, 실행 간 생명주기 기록을
//! 남기기 위해 같은 파일에 계속 이어 씁니다.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_NAME: &str = "wms_control.log";

/// Append-mode handle on `<dir>/wms_control.log`, creating `dir` if needed.
pub fn open_log_file(dir: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

/// Plain-text (no ANSI) layer writing to `file`.
pub fn file_layer<S>(file: File) -> fmt::Layer<S, DefaultFields, Format, Mutex<File>> {
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
}

/// Install the global subscriber. `RUST_LOG` wins, default `info`.
///
/// If the log file cannot be opened, logging continues on stderr only.
pub fn init(log_dir: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file, open_error) = match open_log_file(log_dir) {
        Ok(file) => (Some(file_layer(file)), None),
        Err(e) => (None, Some(e)),
    };

    // stdout은 JSON 출력용이므로 콘솔 로그는 stderr로
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file)
        .init();

    if let Some(e) = open_error {
        tracing::warn!(
            "Cannot open log file in {}: {}, logging to stderr only",
            log_dir.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_accumulates_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        for run in ["first run", "second run"] {
            let file = open_log_file(&log_dir).unwrap();
            let subscriber = tracing_subscriber::registry().with(file_layer(file));
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("WMS service started ({})", run);
            });
        }

        let log = fs::read_to_string(log_dir.join(LOG_FILE_NAME)).unwrap();
        assert!(log.contains("WMS service started (first run)"));
        assert!(log.contains("WMS service started (second run)"));
        assert!(!log.contains('\u{1b}'), "log file must not contain ANSI escapes");
    }

    #[test]
    fn test_open_log_file_fails_on_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("occupied");
        fs::write(&not_a_dir, "x").unwrap();
        assert!(open_log_file(&not_a_dir).is_err());
    }
}

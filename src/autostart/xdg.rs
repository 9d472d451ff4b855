//! Linux backend: XDG autostart entries, launched by the desktop session at
//! user logon.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{AutoStartTaskDescriptor, SchedulerError, TaskScheduler};

/// `X-` 확장 키에 원본 스크립트 경로를 남겨 `run()`에서 다시 읽음
const LAUNCHER_KEY: &str = "X-WMS-Launcher=";

pub struct XdgAutostart {
    dir: PathBuf,
}

impl XdgAutostart {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_CONFIG_HOME/autostart`, falling back to `$HOME/.config/autostart`.
    pub fn from_env() -> Option<Self> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(Self::new(base.join("autostart")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, task_name: &str) -> PathBuf {
        let file: String = task_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '-' })
            .collect();
        self.dir.join(format!("{}.desktop", file))
    }

    fn read_launcher(&self, task_name: &str) -> Result<PathBuf, SchedulerError> {
        let path = self.entry_path(task_name);
        let body = fs::read_to_string(&path)
            .map_err(|e| SchedulerError::from_io(e, &path.display().to_string()))?;
        body.lines()
            .find_map(|l| l.strip_prefix(LAUNCHER_KEY))
            .map(PathBuf::from)
            .ok_or_else(|| {
                SchedulerError::InvalidDescriptor(format!("{} has no launcher entry", path.display()))
            })
    }
}

pub(crate) fn render_entry(descriptor: &AutoStartTaskDescriptor) -> String {
    let command = descriptor.command.display().to_string();
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={name}\n\
         Comment=Start the WMS service at logon\n\
         Exec={exec}\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n\
         {key}{command}\n",
        name = descriptor.task_name,
        exec = exec_quote(&command),
        key = LAUNCHER_KEY,
        command = command,
    )
}

/// freedesktop Desktop Entry의 Exec 인용 규칙
fn exec_quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

impl TaskScheduler for XdgAutostart {
    fn register(&self, descriptor: &AutoStartTaskDescriptor) -> Result<(), SchedulerError> {
        let path = self.entry_path(&descriptor.task_name);
        fs::create_dir_all(&self.dir)
            .map_err(|e| SchedulerError::from_io(e, &self.dir.display().to_string()))?;
        fs::write(&path, render_entry(descriptor))
            .map_err(|e| SchedulerError::from_io(e, &path.display().to_string()))?;
        tracing::debug!("Wrote autostart entry {}", path.display());
        Ok(())
    }

    fn unregister(&self, task_name: &str) -> Result<(), SchedulerError> {
        let path = self.entry_path(task_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SchedulerError::from_io(e, &path.display().to_string())),
        }
    }

    fn exists(&self, task_name: &str) -> Result<bool, SchedulerError> {
        Ok(self.entry_path(task_name).is_file())
    }

    fn run(&self, task_name: &str) -> Result<(), SchedulerError> {
        let launcher = self.read_launcher(task_name)?;
        let mut cmd = Command::new(&launcher);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        crate::utils::detach(&mut cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| SchedulerError::from_io(e, &launcher.display().to_string()))?;
        // 런처 셸은 금방 끝나므로 좀비로 남지 않게 회수
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "xdg-autostart"
    }
}

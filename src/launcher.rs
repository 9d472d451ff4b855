//! Launcher script generation.
//!
//! The scheduled-task facility runs a small script instead of the server
//! binary directly: the script changes into the install directory first, so
//! relative paths inside the service resolve the same way as a manual start.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;

#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("Failed to write launcher script '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LauncherError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::WriteFailed { .. } => "WRITE_FAILED",
        }
    }
}

/// Server launch line without the address part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 전체 argv, 맨 끝에 `--host <host> --port <port>`
    pub fn argv(&self, config: &ServiceConfig) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 5);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.push("--host".to_string());
        argv.push(config.host.clone());
        argv.push("--port".to_string());
        argv.push(config.port.to_string());
        argv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// `.bat` for cmd.exe
    Batch,
    /// POSIX `sh`
    Shell,
}

impl ScriptFlavor {
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            Self::Batch
        } else {
            Self::Shell
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Batch => "run_wms_service.bat",
            Self::Shell => "run_wms_service.sh",
        }
    }
}

pub struct LauncherScript {
    server: ServerCommand,
    flavor: ScriptFlavor,
}

impl LauncherScript {
    pub fn new(server: ServerCommand) -> Self {
        Self::with_flavor(server, ScriptFlavor::native())
    }

    pub fn with_flavor(server: ServerCommand, flavor: ScriptFlavor) -> Self {
        Self { server, flavor }
    }

    pub fn script_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(self.flavor.file_name())
    }

    /// Script text; a pure function of the server command and `config`.
    pub fn render(&self, config: &ServiceConfig) -> String {
        let argv = self.server.argv(config);
        let dir = self.server.working_dir.to_string_lossy();
        match self.flavor {
            ScriptFlavor::Batch => {
                let line: Vec<String> = argv.iter().map(|a| batch_quote(a)).collect();
                format!(
                    "@echo off\r\ncd /D \"{}\"\r\necho Starting WMS Service...\r\n{}\r\n",
                    dir,
                    line.join(" ")
                )
            }
            ScriptFlavor::Shell => {
                let line: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
                format!(
                    "#!/bin/sh\ncd {} || exit 1\necho \"Starting WMS Service...\"\nexec {}\n",
                    shell_quote(&dir),
                    line.join(" ")
                )
            }
        }
    }

    /// 스크립트를 `install_dir`에 기록 (기존 파일은 덮어씀)
    pub fn generate(&self, config: &ServiceConfig, install_dir: &Path) -> Result<PathBuf, LauncherError> {
        let path = self.script_path(install_dir);
        let body = self.render(config);

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(install_dir)?;
            fs::write(&path, &body)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if self.flavor == ScriptFlavor::Shell {
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
                }
            }
            Ok(())
        };

        write().map_err(|source| {
            tracing::error!("Failed to create launcher script {}: {}", path.display(), source);
            LauncherError::WriteFailed {
                path: path.clone(),
                source,
            }
        })?;

        tracing::info!("Created launcher script: {}", path.display());
        Ok(path)
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

fn batch_quote(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    if escaped.is_empty() || escaped.chars().any(|c| c.is_whitespace() || "&|<>^()".contains(c)) {
        format!("\"{}\"", escaped.replace('"', "\"\""))
    } else {
        escaped
    }
}

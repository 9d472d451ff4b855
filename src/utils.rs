//! Shared utility functions for the control surface.

use std::process::Command;

/// Detach a spawned server from the control surface: no console window and a
/// separate process group on Windows, a new process group on Unix, so that
/// Ctrl+C in the terminal running `wms-control` does not reach the service.
#[cfg(target_os = "windows")]
pub fn detach(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
    cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP)
}

#[cfg(unix)]
pub fn detach(cmd: &mut Command) -> &mut Command {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0)
}

#[cfg(not(any(unix, target_os = "windows")))]
pub fn detach(cmd: &mut Command) -> &mut Command {
    cmd
}

/// Hide the console window of helper commands (`schtasks`, `taskkill`) on Windows.
#[cfg(target_os = "windows")]
pub fn no_window(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn no_window(cmd: &mut Command) -> &mut Command {
    cmd
}

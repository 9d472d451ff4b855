pub mod autostart;
pub mod config;
pub mod launcher;
pub mod logging;
pub mod poller;
pub mod process_monitor;
pub mod supervisor;
pub mod utils;

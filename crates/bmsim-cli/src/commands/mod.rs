//! Command implementations for the CLI.

mod info;
mod monitor;
mod read;

pub use info::cmd_info;
pub use monitor::{MonitorArgs, cmd_monitor, run_monitor};
pub use read::cmd_read;

//! Command-line interface components
//!
//! This module contains CLI-specific code for blockfetch, including
//! argument parsing, command handlers and progress display.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{CleanArgs, Cli, Commands, DownloadArgs, GlobalArgs, InitArgs};
pub use commands::{handle_clean, handle_download, handle_init, handle_list};
pub use progress::{ProgressConfig, ProgressDisplay, SessionSummary};

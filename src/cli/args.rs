//! Command-line argument parsing for blockfetch
//!
//! This module defines the CLI structure using clap derive macros: one
//! subcommand to download, and a few to inspect or drop the state kept for
//! resuming interrupted downloads.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::Priority;
use crate::config::AppConfig;

/// blockfetch - resumable multi-connection downloads
#[derive(Parser, Debug)]
#[command(
    name = "blockfetch",
    version,
    about = "Download large files over several connections and resume them after interruption",
    long_about = "Splits each file into blocks fetched concurrently with HTTP range requests.
Progress is checkpointed per block, so an interrupted download continues where it stopped."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Store file path, overrides the configuration
    #[arg(long, global = true, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Do not persist or resume progress
    #[arg(long, global = true, conflicts_with = "store")]
    pub no_store: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more files
    Download(DownloadArgs),

    /// List downloads that can be resumed
    List,

    /// Drop resumable state and temp files
    Clean(CleanArgs),

    /// Write a default configuration file
    Init(InitArgs),
}

/// Arguments for the download command
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// URLs to download, one file each
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Another URL of the same file, part of its identity for resuming
    #[arg(short, long, value_name = "URL")]
    pub mirror: Vec<String>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// File name, only valid with a single URL
    #[arg(short, long)]
    pub name: Option<String>,

    /// Maximum concurrent block transfers
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Blocks each file is split into
    #[arg(short, long)]
    pub per_request: Option<usize>,

    /// Retries per block
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Scheduling priority: low, medium or high
    #[arg(long, default_value = "medium")]
    pub priority: Priority,

    /// Extra request header, as "Name: value"
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the clean command
#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    /// URLs whose state should be dropped
    #[arg(required_unless_present = "all", value_name = "URL")]
    pub urls: Vec<String>,

    /// Drop every persisted download
    #[arg(long)]
    pub all: bool,
}

/// Arguments for the init command
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the file, the user config directory by default
    #[arg(value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level requested on the command line, if any
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }

    /// Apply global overrides to a loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if self.global.no_store {
            config.store.disabled = true;
        } else if let Some(path) = &self.global.store {
            config.store.disabled = false;
            config.store.path = Some(path.clone());
        }
    }
}

impl DownloadArgs {
    /// Check argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_some() && self.urls.len() > 1 {
            return Err("--name can only be used with a single URL".to_string());
        }
        if !self.mirror.is_empty() && self.urls.len() > 1 {
            return Err("--mirror can only be used with a single URL".to_string());
        }
        if self.threads == Some(0) {
            return Err("Thread count must be greater than 0".to_string());
        }
        if self.per_request == Some(0) {
            return Err("Blocks per file must be greater than 0".to_string());
        }
        for header in &self.headers {
            parse_header(header)?;
        }
        Ok(())
    }

    /// Apply command overrides to a loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(threads) = self.threads {
            config.downloader.thread_count = threads;
            config.downloader.core_thread_count = config.downloader.core_thread_count.min(threads);
        }
        match self.per_request {
            Some(per_request) => config.downloader.threads_per_request = per_request,
            None => {
                config.downloader.threads_per_request = config
                    .downloader
                    .threads_per_request
                    .min(config.downloader.thread_count)
            }
        }
        if let Some(retries) = self.retries {
            config.downloader.max_retry_times = retries;
        }
        if let Some(output) = &self.output {
            config.output.directory = output.clone();
        }
    }

    /// Parsed extra headers
    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter_map(|h| parse_header(h).ok())
            .collect()
    }
}

/// Split "Name: value" into its parts
fn parse_header(header: &str) -> Result<(String, String), String> {
    match header.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("Invalid header '{}', expected \"Name: value\"", header)),
    }
}

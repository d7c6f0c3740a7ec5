//! Progress display for the download command
//!
//! Renders one indicatif bar per file when stderr is a terminal and falls
//! back to periodic text lines otherwise, so output piped to a log stays
//! readable.
//!
//! # Examples
//!
//! ```rust,no_run
//! use blockfetch::cli::progress::{ProgressConfig, ProgressDisplay};
//!
//! let mut display = ProgressDisplay::new(ProgressConfig::default());
//! display.add(1, "big.iso");
//! // display.handle(&event) for every DownloadEvent received
//! display.finish();
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::app::DownloadEvent;

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// Interval between text-mode reports
    pub report_interval: Duration,
    /// Maximum width for file names in display
    pub max_filename_width: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            report_interval: Duration::from_secs(10),
            max_filename_width: 30,
        }
    }
}

/// Progress tracked per file
#[derive(Debug)]
struct FileProgress {
    name: String,
    downloaded: u64,
    total: u64,
    bar: Option<ProgressBar>,
}

/// Outcome counts for the session summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SessionSummary {
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Main progress display manager
pub struct ProgressDisplay {
    config: ProgressConfig,
    multi_progress: Option<MultiProgress>,
    files: HashMap<u64, FileProgress>,
    summary: SessionSummary,
    started: Instant,
    last_report: Instant,
}

impl ProgressDisplay {
    /// Create a display; bars are only drawn on a terminal
    pub fn new(config: ProgressConfig) -> Self {
        let is_terminal = atty::is(atty::Stream::Stderr);
        let multi_progress = (config.enable_progress_bars && is_terminal)
            .then(|| MultiProgress::with_draw_target(ProgressDrawTarget::stderr()));

        Self {
            config,
            multi_progress,
            files: HashMap::new(),
            summary: SessionSummary::default(),
            started: Instant::now(),
            last_report: Instant::now(),
        }
    }

    /// Whether bars are drawn rather than text lines
    pub fn is_visual(&self) -> bool {
        self.multi_progress.is_some()
    }

    /// Track a started request
    pub fn add(&mut self, request_id: u64, name: &str) {
        let name = truncate_name(name, self.config.max_filename_width);
        let bar = self.multi_progress.as_ref().map(|multi| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(bar_style());
            bar.set_prefix(name.clone());
            bar.set_message("preparing");
            bar
        });

        self.files.insert(
            request_id,
            FileProgress {
                name,
                downloaded: 0,
                total: 0,
                bar,
            },
        );
    }

    /// Apply one engine event
    pub fn handle(&mut self, event: &DownloadEvent) {
        let Some(file) = self.files.get_mut(&event.request_id()) else {
            return;
        };

        match event {
            DownloadEvent::Progress {
                downloaded, total, ..
            } => {
                file.downloaded = *downloaded;
                file.total = *total;
                if let Some(bar) = &file.bar {
                    bar.set_length(*total);
                    bar.set_position(*downloaded);
                    bar.set_message("");
                }
            }
            DownloadEvent::BlockFailed { block, error, .. } => {
                debug!("{}: block {} failed: {}", file.name, block.index(), error);
            }
            DownloadEvent::Completed { .. } => {
                self.summary.completed += 1;
                finish_file(file, "done".to_string());
            }
            DownloadEvent::Failed { error, .. } => {
                self.summary.failed += 1;
                finish_file(file, format!("failed: {}", error));
            }
            DownloadEvent::Cancelled { .. } => {
                self.summary.cancelled += 1;
                finish_file(file, "cancelled".to_string());
            }
            DownloadEvent::BlockProgress { .. } | DownloadEvent::BlockCompleted { .. } => {}
        }

        if self.multi_progress.is_none() && self.last_report.elapsed() >= self.config.report_interval {
            self.report();
        }
    }

    /// Text-mode status line for every unfinished file
    fn report(&mut self) {
        self.last_report = Instant::now();
        for file in self.files.values() {
            if file.total > 0 && file.downloaded < file.total {
                println!(
                    "{}: {} / {} ({:.1}%)",
                    file.name,
                    HumanBytes(file.downloaded),
                    HumanBytes(file.total),
                    file.downloaded as f64 * 100.0 / file.total as f64
                );
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Clear the bars and print the session summary
    pub fn finish(&mut self) -> SessionSummary {
        for file in self.files.values() {
            if let Some(bar) = &file.bar {
                if !bar.is_finished() {
                    bar.abandon();
                }
            }
        }
        if let Some(multi) = &self.multi_progress {
            let _ = multi.clear();
        }

        let bytes: u64 = self.files.values().map(|f| f.downloaded).sum();
        println!(
            "{} completed, {} failed, {} cancelled, {} in {:.1}s",
            self.summary.completed,
            self.summary.failed,
            self.summary.cancelled,
            HumanBytes(bytes),
            self.started.elapsed().as_secs_f64()
        );
        self.summary
    }
}

fn finish_file(file: &mut FileProgress, message: String) {
    match &file.bar {
        Some(bar) => bar.finish_with_message(message),
        None => println!("{}: {}", file.name, message),
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{prefix:30} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Shorten a file name to `width` characters
fn truncate_name(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let keep: String = name.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", keep)
}

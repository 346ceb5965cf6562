//! Transfer progress display with progress bars.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sealdrop_core::{Error, FileName, Progress, TransferReport};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})";

/// Per-file progress bars for one session
#[derive(Default)]
pub struct TransferProgress {
    bar: Option<ProgressBar>,
}

impl TransferProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for TransferProgress {
    fn start(&mut self, name: &FileName, len: Option<u64>) {
        let bar = match len {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            }
        };

        bar.set_message(format!("Transferring: {name}"));
        self.bar = Some(bar);
    }

    fn advance(&mut self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
    }

    fn finish(&mut self, report: &TransferReport) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!(
                "{} {} ({} in {}, {})",
                style("✓").green(),
                report.name,
                format_bytes(report.bytes),
                format_duration(report.elapsed),
                format_speed(report.throughput()),
            ));
        }
    }

    fn fail(&mut self, error: &Error) {
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message(format!("{} {error}", style("✗").red()));
        }
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

//! Progress reporting for row loads
//!
//! A marker is logged through `tracing` for the first row and then every
//! `every` rows (0-based row index divisible by `every`). When a terminal bar
//! is requested, an `indicatif` bar tracks the same position.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default number of rows between progress markers
pub const DEFAULT_PROGRESS_EVERY: usize = 250;

/// How often and where to report progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Rows between markers (0 disables markers)
    pub every: usize,
    /// Draw an `indicatif` bar on stderr
    pub show_bar: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            every: DEFAULT_PROGRESS_EVERY,
            show_bar: false,
        }
    }
}

impl ProgressConfig {
    pub fn with_every(mut self, every: usize) -> Self {
        self.every = every;
        self
    }

    pub fn with_bar(mut self, show_bar: bool) -> Self {
        self.show_bar = show_bar;
        self
    }

    /// Start reporting on a load of `total` rows
    pub fn start(&self, label: &str, total: usize) -> RowProgress {
        RowProgress::new(label, total, self.every, self.show_bar)
    }
}

/// Progress of one row-by-row load
pub struct RowProgress {
    label: String,
    total: usize,
    every: usize,
    markers: usize,
    bar: ProgressBar,
}

impl RowProgress {
    /// Create a progress reporter
    ///
    /// # Arguments
    /// * `label` - Name of the load (usually the target table)
    /// * `total` - Number of rows to process
    /// * `every` - Rows between markers
    /// * `show_bar` - Whether to draw a terminal bar
    pub fn new(label: &str, total: usize, every: usize, show_bar: bool) -> Self {
        let bar = if show_bar {
            let bar = ProgressBar::new(total as u64);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
            bar.set_style(style);
            bar.set_message(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            label: label.to_string(),
            total,
            every,
            markers: 0,
            bar,
        }
    }

    /// A reporter that never draws a bar
    pub fn hidden(label: &str, total: usize, every: usize) -> Self {
        Self::new(label, total, every, false)
    }

    /// Record that `processed` rows are done (1-based)
    pub fn tick(&mut self, processed: usize) {
        self.bar.set_position(processed as u64);
        if self.every > 0 && processed > 0 && (processed - 1) % self.every == 0 {
            self.markers += 1;
            info!(
                table = %self.label,
                "{}/{} rows processed",
                format_number(processed as u64),
                format_number(self.total as u64)
            );
        }
    }

    /// Number of markers emitted so far
    pub fn markers(&self) -> usize {
        self.markers
    }

    /// Finish the bar and log the final count
    pub fn finish(&self, processed: usize) {
        self.bar.finish_and_clear();
        info!(
            table = %self.label,
            rows = processed,
            "Finished {}",
            self.label
        );
    }
}

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

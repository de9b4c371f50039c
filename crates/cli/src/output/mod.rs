//! Output formatting utilities
//!
//! Formatters for CLI output in both human-readable and JSON formats, and
//! the status line sampled from a session's progress aggregator.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::{StatusLine, StatusUnit, render_line};

/// Output configuration derived from CLI flags
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable the status line
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

impl OutputConfig {
    /// Whether a status line may be drawn at all
    pub fn progress_enabled(&self) -> bool {
        !(self.quiet || self.json || self.no_progress)
    }
}

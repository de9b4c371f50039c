//! Human-readable and JSON output
//!
//! Results go to stdout. Notices (success, warning, error) are single lines
//! with a status glyph; errors and warnings go to stderr so a piped stdout
//! only carries results.

use console::{Style, Term};
use serde::Serialize;

use super::OutputConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Success,
    Warning,
    Error,
}

impl Level {
    fn glyph(self) -> &'static str {
        match self {
            Level::Success => "✓",
            Level::Warning => "⚠",
            Level::Error => "✗",
        }
    }

    fn style(self) -> Style {
        match self {
            Level::Success => Style::new().green(),
            Level::Warning => Style::new().yellow(),
            Level::Error => Style::new().red().bold(),
        }
    }
}

/// Writes command results and notices according to the output flags
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn colors_enabled(&self) -> bool {
        !self.config.no_color && !self.config.json
    }

    fn notice_line(&self, level: Level, message: &str) -> String {
        let glyph = if self.colors_enabled() {
            level.style().apply_to(level.glyph()).to_string()
        } else {
            level.glyph().to_string()
        };
        format!("{glyph} {message}")
    }

    /// Final success line; silent in quiet and JSON modes
    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let _ = Term::stdout().write_line(&self.notice_line(Level::Success, message));
    }

    /// Error line on stderr, printed even in quiet mode
    ///
    /// In JSON mode the error is a `{"error": ...}` object so scripts can
    /// parse stderr too.
    pub fn error(&self, message: &str) {
        let line = if self.config.json {
            serde_json::json!({ "error": message }).to_string()
        } else {
            self.notice_line(Level::Error, message)
        };
        let _ = Term::stderr().write_line(&line);
    }

    /// Warning line on stderr
    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let _ = Term::stderr().write_line(&self.notice_line(Level::Warning, message));
    }

    /// Pretty-printed JSON document on stdout
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => self.error(&format!("Error serializing output: {e}")),
        }
    }

    /// Plain result line on stdout
    pub fn println(&self, message: &str) {
        if !self.config.quiet {
            println!("{message}");
        }
    }
}

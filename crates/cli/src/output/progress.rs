//! Status line for running sessions
//!
//! The session never pushes events; a ticker samples the aggregator and
//! redraws a single line on stderr.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use s3sync_core::{Metric, Phase, ProgressAggregator, Snapshot};
use tokio::task::JoinHandle;

use super::OutputConfig;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// What the progress counter measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUnit {
    /// Bytes moved, with a transfer rate
    Bytes,
    /// Objects deleted, without a rate
    Objects,
}

impl StatusUnit {
    fn metric(self) -> Metric {
        match self {
            StatusUnit::Bytes => Metric::BytesTransferred,
            StatusUnit::Objects => Metric::ObjectsDeleted,
        }
    }
}

/// Render one status line from a snapshot
///
/// Returns `None` when there is nothing worth drawing yet.
pub fn render_line(snapshot: &Snapshot, unit: StatusUnit) -> Option<String> {
    let metric = unit.metric();
    let value = snapshot.get(metric);

    if value.amount == 0 && snapshot.phase == Phase::Discovering {
        let found =
            snapshot.get(Metric::FilesFound).amount + snapshot.get(Metric::ObjectsFound).amount;
        return Some(format!("Listing objects... {found} objects found"));
    }

    let total = value.total.filter(|total| *total > 0)?;
    let percent = value.percent().unwrap_or(0);
    let mut line = format!("Progress: {}/{} {}%", value.amount, total, percent);
    if unit == StatusUnit::Bytes {
        let speed = humansize::format_size(snapshot.rate(metric) as u64, humansize::BINARY);
        line.push_str(&format!(" {speed}/s"));
    }
    Some(line)
}

/// Spinner line polling a session's aggregator
///
/// Hidden in quiet, JSON and no-progress modes, and when stderr is not a
/// terminal.
pub struct StatusLine {
    bar: Option<ProgressBar>,
    poller: Option<JoinHandle<()>>,
    progress: Arc<ProgressAggregator>,
    unit: StatusUnit,
}

impl StatusLine {
    pub fn start(config: &OutputConfig, progress: Arc<ProgressAggregator>, unit: StatusUnit) -> Self {
        if !config.progress_enabled() || !console::Term::stderr().is_term() {
            return Self {
                bar: None,
                poller: None,
                progress,
                unit,
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        let poller = tokio::spawn(poll(bar.clone(), progress.clone(), unit));

        Self {
            bar: Some(bar),
            poller: Some(poller),
            progress,
            unit,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }

    /// Stop polling and leave the final line on screen
    pub fn finish(self) {
        if let Some(poller) = self.poller {
            poller.abort();
        }
        if let Some(bar) = self.bar {
            match render_line(&self.progress.snapshot(), self.unit) {
                Some(line) => bar.finish_with_message(line),
                None => bar.finish_and_clear(),
            }
        }
    }
}

async fn poll(bar: ProgressBar, progress: Arc<ProgressAggregator>, unit: StatusUnit) {
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        ticker.tick().await;
        let snapshot = progress.snapshot();
        if let Some(line) = render_line(&snapshot, unit) {
            bar.set_message(line);
        }
        bar.tick();
        if snapshot.terminal.is_some() {
            break;
        }
    }
}

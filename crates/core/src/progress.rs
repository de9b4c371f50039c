//! Progress aggregation
//!
//! A session has one [`ProgressAggregator`]. Every producer (the differ, each
//! transfer task, each deletion) adds deltas into it; a renderer polls
//! [`ProgressAggregator::snapshot`] on an interval. The aggregator also carries
//! the session phase and the one-time terminal signal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Error;

/// Named progress counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    FilesFound,
    ObjectsFound,
    BytesTransferred,
    BytesHashed,
    ObjectsDeleted,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::FilesFound,
        Metric::ObjectsFound,
        Metric::BytesTransferred,
        Metric::BytesHashed,
        Metric::ObjectsDeleted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Metric::FilesFound => "files-found",
            Metric::ObjectsFound => "objects-found",
            Metric::BytesTransferred => "bytes-transferred",
            Metric::BytesHashed => "bytes-hashed",
            Metric::ObjectsDeleted => "objects-deleted",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one metric at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricValue {
    pub amount: u64,
    /// `None` while discovery for this metric is still running
    pub total: Option<u64>,
}

impl MetricValue {
    /// Fraction complete in `0.0..=1.0`, undefined while the total is unknown
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.amount as f64 / total as f64),
            None => None,
        }
    }

    /// Whole-number percentage, undefined while the total is unknown
    pub fn percent(&self) -> Option<u64> {
        self.fraction().map(|f| (f * 100.0).floor() as u64)
    }
}

/// Session phase
///
/// Transitions only move forward. Discovery and transfer may overlap in time;
/// the phase records the furthest stage reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovering,
    Transferring,
    Deleting,
    Done,
    Failed,
}

impl Phase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

/// The terminal signal of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Terminal {
    Done,
    Failed(String),
    Cancelled,
}

/// Consistent point-in-time read of every metric
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub metrics: BTreeMap<Metric, MetricValue>,
    pub phase: Phase,
    #[serde(skip)]
    pub elapsed: Duration,
    pub terminal: Option<Terminal>,
}

impl Snapshot {
    /// Value of a metric (zero if never reported)
    pub fn get(&self, metric: Metric) -> MetricValue {
        self.metrics.get(&metric).copied().unwrap_or_default()
    }

    /// Average rate of a metric since the session started, per second
    pub fn rate(&self, metric: Metric) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.get(metric).amount as f64 / secs
    }
}

#[derive(Debug)]
struct State {
    metrics: BTreeMap<Metric, MetricValue>,
    phase: Phase,
}

/// Shared accumulator of progress metrics for one session
#[derive(Debug)]
pub struct ProgressAggregator {
    started: Instant,
    state: Mutex<State>,
    terminal: watch::Sender<Option<Terminal>>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        let (terminal, _) = watch::channel(None);
        Self {
            started: Instant::now(),
            state: Mutex::new(State {
                metrics: BTreeMap::new(),
                phase: Phase::Discovering,
            }),
            terminal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `delta` to a metric, clamped to its total when known
    pub fn report(&self, metric: Metric, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut state = self.lock();
        let value = state.metrics.entry(metric).or_default();
        let amount = value.amount.saturating_add(delta);
        value.amount = match value.total {
            Some(total) => amount.min(total),
            None => amount,
        };
    }

    /// Record the final total of a metric once discovery for it completes
    pub fn set_total(&self, metric: Metric, total: u64) {
        let mut state = self.lock();
        let value = state.metrics.entry(metric).or_default();
        if value.amount > total {
            tracing::debug!(%metric, amount = value.amount, total, "Total below amount, raising");
        }
        value.total = Some(total.max(value.amount));
    }

    /// Move the phase forward; returns false if it would go backwards or past a terminal
    pub fn advance(&self, phase: Phase) -> bool {
        if phase.is_terminal() {
            return false;
        }
        let mut state = self.lock();
        if state.phase.is_terminal() || phase <= state.phase {
            return false;
        }
        state.phase = phase;
        true
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Consistent read of all metrics
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            metrics: state.metrics.clone(),
            phase: state.phase,
            elapsed: self.started.elapsed(),
            terminal: self.terminal.borrow().clone(),
        }
    }

    /// Fire the success signal; returns true only for the call that fired it
    pub fn mark_done(&self) -> bool {
        self.finish(Phase::Done, Terminal::Done)
    }

    /// Fire the failure signal; returns true only for the call that fired it
    pub fn mark_failed(&self, error: &Error) -> bool {
        let terminal = match error {
            Error::Cancelled => Terminal::Cancelled,
            other => Terminal::Failed(other.to_string()),
        };
        self.finish(Phase::Failed, terminal)
    }

    fn finish(&self, phase: Phase, terminal: Terminal) -> bool {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            return false;
        }
        state.phase = phase;
        // Published under the lock so a snapshot never sees a terminal phase
        // without its signal.
        self.terminal.send_replace(Some(terminal));
        true
    }

    /// Terminal signal if it has fired
    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal.borrow().clone()
    }

    /// Wait until the terminal signal fires
    pub async fn wait(&self) -> Terminal {
        let mut rx = self.terminal.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(terminal) => terminal.clone().unwrap_or(Terminal::Done),
            Err(_) => Terminal::Failed("progress channel closed".to_string()),
        }
    }
}

/// Byte counter for one transfer job
///
/// Stores call [`ByteProgress::advance`] as bytes move. A retried attempt calls
/// [`ByteProgress::restart`]; bytes below the previous high-water mark are not
/// reported again, and the job never reports more than its declared size.
#[derive(Debug, Clone)]
pub struct ByteProgress {
    inner: Arc<ByteProgressInner>,
}

#[derive(Debug)]
struct ByteProgressInner {
    sink: Option<(Arc<ProgressAggregator>, Metric)>,
    limit: Option<u64>,
    positions: Mutex<Positions>,
}

#[derive(Debug, Default)]
struct Positions {
    attempt: u64,
    reported: u64,
}

impl ByteProgress {
    /// Counter feeding `metric` on `aggregator`, capped at `limit` bytes
    pub fn new(aggregator: Arc<ProgressAggregator>, metric: Metric, limit: Option<u64>) -> Self {
        Self {
            inner: Arc::new(ByteProgressInner {
                sink: Some((aggregator, metric)),
                limit,
                positions: Mutex::new(Positions::default()),
            }),
        }
    }

    /// Counter that reports nowhere
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(ByteProgressInner {
                sink: None,
                limit: None,
                positions: Mutex::new(Positions::default()),
            }),
        }
    }

    /// Start a new attempt from byte zero
    pub fn restart(&self) {
        self.positions().attempt = 0;
    }

    /// Record `bytes` more moved in the current attempt
    pub fn advance(&self, bytes: u64) {
        let delta = {
            let mut positions = self.positions();
            positions.attempt = positions.attempt.saturating_add(bytes);
            let mut high = positions.attempt;
            if let Some(limit) = self.inner.limit {
                high = high.min(limit);
            }
            let delta = high.saturating_sub(positions.reported);
            positions.reported = positions.reported.max(high);
            delta
        };
        if let Some((aggregator, metric)) = &self.inner.sink {
            aggregator.report(*metric, delta);
        }
    }

    /// Bytes reported so far across all attempts
    pub fn reported(&self) -> u64 {
        self.positions().reported
    }

    /// Bytes moved by the current attempt
    pub fn attempt_position(&self) -> u64 {
        self.positions().attempt
    }

    fn positions(&self) -> MutexGuard<'_, Positions> {
        self.inner
            .positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

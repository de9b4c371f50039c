//! Sync session
//!
//! A session owns one differ pass, one transfer pool and one progress
//! aggregator. It drives the phases, enforces the barrier between transfers
//! and deletions, and produces the final [`Outcome`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::differ::{DiffOptions, Differ, Direction, SyncAction};
use crate::error::{Error, Result};
use crate::path::{KeyResolver, ParsedPath, parse_address};
use crate::pool::{Job, JobKind, JobReport, Task, TransferPool};
use crate::progress::{Metric, Phase, ProgressAggregator, Snapshot};
use crate::traits::{ObjectStore, PutOptions, UploadHeaders};

/// What to synchronize
#[derive(Clone)]
pub struct SyncRequest {
    /// Local directory or `s3://` address
    pub source: String,
    /// Local directory or `s3://` address; exactly one side must be remote
    pub destination: String,
    /// Remove destination entries that have no source counterpart
    pub delete_removed: bool,
    /// Compute the plan without transferring anything
    pub dry_run: bool,
    /// Headers for uploaded files
    pub headers: Arc<dyn UploadHeaders>,
}

impl SyncRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            delete_removed: false,
            dry_run: false,
            headers: Arc::new(PutOptions::default()),
        }
    }
}

impl std::fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRequest")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("delete_removed", &self.delete_removed)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Totals for a finished session
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub uploaded: u64,
    pub downloaded: u64,
    pub copied: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
    pub dry_run: bool,
    /// Planned actions, kept only for dry runs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<SyncAction>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl Summary {
    pub(crate) fn record(&mut self, report: &JobReport) {
        match report.kind {
            JobKind::Upload => self.uploaded += 1,
            JobKind::Download => self.downloaded += 1,
            JobKind::Copy => self.copied += 1,
            JobKind::Delete => {}
        }
        self.deleted += report.deleted;
        self.bytes_transferred += report.bytes;
    }
}

/// Final result of a session
#[derive(Debug)]
pub enum Outcome {
    Success(Summary),
    /// The session ran to the end but some items failed
    PartialFailure { summary: Summary, errors: Vec<Error> },
    /// The session could not run to the end
    FatalFailure(Error),
}

impl Outcome {
    pub fn summary(&self) -> Option<&Summary> {
        match self {
            Outcome::Success(summary) | Outcome::PartialFailure { summary, .. } => Some(summary),
            Outcome::FatalFailure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success(_) => 0,
            Outcome::PartialFailure { .. } => 8,
            Outcome::FatalFailure(e) => e.exit_code(),
        }
    }
}

/// Handle to a running session
pub struct SessionHandle {
    progress: Arc<ProgressAggregator>,
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl SessionHandle {
    pub(crate) fn spawn<F>(
        progress: Arc<ProgressAggregator>,
        cancel: CancellationToken,
        work: F,
    ) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self {
            progress,
            cancel,
            task: tokio::spawn(work),
        }
    }

    /// Shared aggregator; poll [`ProgressAggregator::snapshot`] for status
    pub fn progress(&self) -> Arc<ProgressAggregator> {
        self.progress.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.progress.snapshot()
    }

    /// Stop submitting work; in-flight jobs run to completion
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the final outcome
    pub async fn wait(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = Error::General(format!("session task failed: {e}"));
                self.progress.mark_failed(&error);
                Outcome::FatalFailure(error)
            }
        }
    }
}

/// Shared state of one running session
pub(crate) struct SessionContext {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) config: TransferConfig,
    pub(crate) progress: Arc<ProgressAggregator>,
    pub(crate) cancel: CancellationToken,
}

impl SessionContext {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Self {
        Self {
            store,
            config,
            progress: Arc::new(ProgressAggregator::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn pool(&self) -> TransferPool {
        TransferPool::new(
            self.store.clone(),
            self.config.clone(),
            self.progress.clone(),
            self.cancel.clone(),
        )
    }

    /// Submit `jobs` and wait for all of them
    ///
    /// Returns false if the stop signal interrupted submission.
    pub(crate) async fn run_jobs(
        &self,
        pool: &TransferPool,
        jobs: Vec<Job>,
        summary: &mut Summary,
        errors: &mut Vec<Error>,
    ) -> bool {
        let mut tasks: Vec<Task> = Vec::with_capacity(jobs.len());
        let mut completed = true;

        for job in jobs {
            match pool.submit(job).await {
                Ok(task) => tasks.push(task),
                Err(Error::Cancelled) => {
                    tracing::info!("Stop requested, no further jobs submitted");
                    completed = false;
                    break;
                }
                Err(e) => errors.push(e),
            }
        }

        for task in tasks {
            match task.wait().await {
                Ok(report) => {
                    summary.record(&report);
                    errors.extend(
                        report
                            .not_deleted
                            .iter()
                            .map(|target| Error::transfer(target.as_str(), "not deleted")),
                    );
                }
                Err(e) => errors.push(e),
            }
        }
        completed
    }

    /// Fire the terminal signal and build the outcome
    ///
    /// A stop request seen at any point before this call ends the session as
    /// cancelled, even when every submitted job finished.
    pub(crate) fn conclude(
        &self,
        mut summary: Summary,
        errors: Vec<Error>,
        completed: bool,
    ) -> Outcome {
        summary.elapsed = self.progress.snapshot().elapsed;
        if !completed || self.cancel.is_cancelled() {
            self.progress.mark_failed(&Error::Cancelled);
            return Outcome::FatalFailure(Error::Cancelled);
        }

        summary.failed = errors.len() as u64;
        if errors.is_empty() {
            self.progress.mark_done();
            tracing::info!(
                uploaded = summary.uploaded,
                downloaded = summary.downloaded,
                deleted = summary.deleted,
                skipped = summary.skipped,
                "Session complete"
            );
            Outcome::Success(summary)
        } else {
            let error = Error::General(format!("{} item(s) failed", errors.len()));
            self.progress.mark_failed(&error);
            tracing::warn!(failed = errors.len(), "Session finished with failures");
            Outcome::PartialFailure { summary, errors }
        }
    }

    pub(crate) fn fail(&self, error: Error) -> Outcome {
        tracing::warn!(error = %error, "Session failed");
        self.progress.mark_failed(&error);
        Outcome::FatalFailure(error)
    }
}

/// One sync of a local directory with a remote prefix
pub struct SyncSession {
    request: SyncRequest,
    resolver: KeyResolver,
    direction: Direction,
    context: SessionContext,
}

impl SyncSession {
    /// Validate the request; fails with `InvalidAddress` before any I/O
    pub fn new(
        request: SyncRequest,
        store: Arc<dyn ObjectStore>,
        config: TransferConfig,
    ) -> Result<Self> {
        let source = parse_address(&request.source)?;
        let destination = parse_address(&request.destination)?;

        let (direction, local, remote) = match (source, destination) {
            (ParsedPath::Local(local), ParsedPath::Remote(remote)) => {
                (Direction::Upload, local, remote)
            }
            (ParsedPath::Remote(remote), ParsedPath::Local(local)) => {
                (Direction::Download, local, remote)
            }
            _ => {
                return Err(Error::InvalidAddress(format!(
                    "exactly one of '{}' and '{}' must be an s3:// address",
                    request.source, request.destination
                )));
            }
        };
        let resolver = KeyResolver::new(local, remote)?;

        Ok(Self {
            request,
            resolver,
            direction,
            context: SessionContext::new(store, config),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Start the session on the runtime
    pub fn spawn(self) -> SessionHandle {
        let progress = self.context.progress.clone();
        let cancel = self.context.cancel.clone();
        SessionHandle::spawn(progress, cancel, self.run())
    }

    async fn run(self) -> Outcome {
        let ctx = &self.context;
        tracing::info!(
            source = %self.request.source,
            destination = %self.request.destination,
            direction = ?self.direction,
            "Starting sync"
        );

        let options = DiffOptions {
            direction: self.direction,
            delete_removed: self.request.delete_removed,
            hash_check: ctx.config.hash_check,
            part_size: ctx.config.part_size,
            hash_concurrency: ctx.config.max_concurrency.clamp(1, 8),
        };
        let differ = Differ::new(
            self.resolver.clone(),
            ctx.store.clone(),
            ctx.progress.clone(),
            options,
            ctx.cancel.clone(),
        );

        let plan = tokio::select! {
            plan = differ.plan() => plan,
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => return ctx.fail(e),
        };

        let counts = plan.counts();
        tracing::info!(
            uploads = counts.uploads,
            downloads = counts.downloads,
            deletes = counts.deletes,
            skips = counts.skips,
            "Plan ready"
        );

        let (actions, mut errors) = plan.into_parts();
        let mut summary = Summary {
            skipped: counts.skips as u64,
            dry_run: self.request.dry_run,
            ..Default::default()
        };

        let (transfers, deletions): (Vec<_>, Vec<_>) = actions
            .iter()
            .filter(|a| a.is_transfer() || a.is_delete())
            .partition(|a| a.is_transfer());

        let bytes: u64 = transfers.iter().filter_map(|a| a.entry().size).sum();
        ctx.progress.set_total(Metric::BytesTransferred, bytes);
        ctx.progress
            .set_total(Metric::ObjectsDeleted, deletions.len() as u64);

        if self.request.dry_run {
            summary.planned = actions;
            return ctx.conclude(summary, errors, true);
        }

        let headers = self.request.headers.as_ref();
        let resolve = |actions: Vec<&SyncAction>| -> Vec<Job> {
            actions
                .into_iter()
                .filter_map(|a| Job::from_action(a, &self.resolver, headers))
                .collect()
        };

        let pool = ctx.pool();
        ctx.progress.advance(Phase::Transferring);
        let completed = ctx
            .run_jobs(&pool, resolve(transfers), &mut summary, &mut errors)
            .await;

        // Barrier: every transfer task has finished before any deletion starts
        let completed = if completed && !deletions.is_empty() {
            ctx.progress.advance(Phase::Deleting);
            ctx.run_jobs(&pool, resolve(deletions), &mut summary, &mut errors)
                .await
        } else {
            completed
        };

        ctx.conclude(summary, errors, completed)
    }
}

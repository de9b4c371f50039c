//! Transfer task pool
//!
//! Runs jobs with bounded concurrency. `submit` waits for a free slot, so a
//! producer that submits faster than jobs complete is suspended. A failed job
//! is reported through its [`Task`] and never affects its siblings.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::differ::SyncAction;
use crate::error::{Error, Result};
use crate::path::{KeyResolver, RemotePath};
use crate::progress::{ByteProgress, Metric, ProgressAggregator};
use crate::retry::{is_retryable_error, retry_with_backoff};
use crate::traits::{ObjectStore, PutOptions, UploadHeaders};

/// A unit of work resolved to concrete locations
#[derive(Debug, Clone)]
pub enum Job {
    Upload {
        source: PathBuf,
        target: RemotePath,
        size: u64,
        options: PutOptions,
    },
    Download {
        source: RemotePath,
        target: PathBuf,
        size: u64,
    },
    Copy {
        source: RemotePath,
        target: RemotePath,
        size: u64,
    },
    DeleteRemote {
        target: RemotePath,
    },
    /// Up to 1000 keys removed with one request
    DeleteBatch {
        bucket: String,
        keys: Vec<String>,
    },
    DeleteLocal {
        target: PathBuf,
    },
}

/// Kind of work a finished job performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Upload,
    Download,
    Copy,
    Delete,
}

impl Job {
    /// Resolve a differ action; `Skip` has no job
    pub fn from_action(
        action: &SyncAction,
        resolver: &KeyResolver,
        headers: &dyn UploadHeaders,
    ) -> Option<Job> {
        let entry = action.entry();
        let key = entry.relative_key.as_str();
        let size = entry.size.unwrap_or(0);
        match action {
            SyncAction::Upload(_) => {
                let source = resolver.local_path(key);
                let options = headers.put_options(&source);
                Some(Job::Upload {
                    source,
                    target: resolver.remote_path(key),
                    size,
                    options,
                })
            }
            SyncAction::Download(_) => Some(Job::Download {
                source: resolver.remote_path(key),
                target: resolver.local_path(key),
                size,
            }),
            SyncAction::DeleteRemote(_) => Some(Job::DeleteRemote {
                target: resolver.remote_path(key),
            }),
            SyncAction::DeleteLocal(_) => Some(Job::DeleteLocal {
                target: resolver.local_path(key),
            }),
            SyncAction::Skip(_) => None,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::Upload { .. } => JobKind::Upload,
            Job::Download { .. } => JobKind::Download,
            Job::Copy { .. } => JobKind::Copy,
            Job::DeleteRemote { .. } | Job::DeleteBatch { .. } | Job::DeleteLocal { .. } => {
                JobKind::Delete
            }
        }
    }

    /// Bytes this job moves
    pub fn size(&self) -> u64 {
        match self {
            Job::Upload { size, .. } | Job::Download { size, .. } | Job::Copy { size, .. } => {
                *size
            }
            _ => 0,
        }
    }

    /// Objects this job removes
    pub fn deletions(&self) -> u64 {
        match self {
            Job::DeleteRemote { .. } | Job::DeleteLocal { .. } => 1,
            Job::DeleteBatch { keys, .. } => keys.len() as u64,
            _ => 0,
        }
    }

    /// Human-readable name of the item, used in errors
    pub fn label(&self) -> String {
        match self {
            Job::Upload { target, .. } | Job::Copy { target, .. } => target.to_string(),
            Job::Download { source, .. } => source.to_string(),
            Job::DeleteRemote { target } => target.to_string(),
            Job::DeleteLocal { target } => target.display().to_string(),
            Job::DeleteBatch { bucket, keys } => match keys.first() {
                Some(first) => format!("s3://{bucket}/{first} (+{} more)", keys.len() - 1),
                None => format!("s3://{bucket}/"),
            },
        }
    }

    /// Identity of the location this job writes to or removes
    fn target_id(&self) -> String {
        match self {
            Job::Upload { target, .. } | Job::Copy { target, .. } => target.to_string(),
            Job::DeleteRemote { target } => target.to_string(),
            Job::Download { target, .. } | Job::DeleteLocal { target } => {
                format!("file://{}", target.display())
            }
            Job::DeleteBatch { bucket, keys } => {
                format!("batch://{bucket}/{}", keys.first().map_or("", String::as_str))
            }
        }
    }
}

/// Result of a completed job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub label: String,
    pub kind: JobKind,
    pub bytes: u64,
    pub deleted: u64,
    /// Objects of a batch the store refused to delete
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_deleted: Vec<String>,
    pub attempts: u32,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Handle to a submitted job
#[derive(Debug)]
pub struct Task {
    label: String,
    handle: JoinHandle<Result<JobReport>>,
}

impl Task {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the job to finish
    pub async fn wait(self) -> Result<JobReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::transfer(self.label, format!("task aborted: {e}"))),
        }
    }
}

/// Removes a target from the in-flight set when the job ends, however it ends
struct InFlight {
    targets: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

/// Bounded-concurrency executor for jobs
pub struct TransferPool {
    store: Arc<dyn ObjectStore>,
    config: Arc<TransferConfig>,
    progress: Arc<ProgressAggregator>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl TransferPool {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: TransferConfig,
        progress: Arc<ProgressAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            store,
            config: Arc::new(config),
            progress,
            cancel,
            permits,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit a job, waiting while every slot is busy
    ///
    /// Fails with `Conflict` if a job for the same target is still running and
    /// with `Cancelled` if the stop signal fires before a slot frees up.
    pub async fn submit(&self, job: Job) -> Result<Task> {
        let id = job.target_id();
        let guard = {
            let mut targets = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !targets.insert(id.clone()) {
                return Err(Error::Conflict(format!("{} is already in flight", job.label())));
            }
            InFlight {
                targets: self.in_flight.clone(),
                id,
            }
        };

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        let label = job.label();
        let store = self.store.clone();
        let config = self.config.clone();
        let progress = self.progress.clone();

        tracing::debug!(job = %label, kind = ?job.kind(), "Job started");
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            run(store.as_ref(), &job, &config, &progress).await
        });

        Ok(Task { label, handle })
    }
}

async fn run(
    store: &dyn ObjectStore,
    job: &Job,
    config: &TransferConfig,
    progress: &Arc<ProgressAggregator>,
) -> Result<JobReport> {
    let started = Instant::now();
    let label = job.label();
    let bytes = match job.kind() {
        JobKind::Delete => ByteProgress::detached(),
        _ => ByteProgress::new(progress.clone(), Metric::BytesTransferred, Some(job.size())),
    };
    let mut attempts = 0;

    let result = retry_with_backoff(
        &config.retry,
        |attempt| {
            attempts = attempt;
            bytes.restart();
            let bytes = bytes.clone();
            let label = label.as_str();
            async move {
                let attempt = attempt_once(store, job, &bytes);
                until_stalled(attempt, &bytes, config.operation_timeout, label).await
            }
        },
        is_retryable_error,
    )
    .await;

    match result {
        Ok(Cleared {
            deleted,
            not_deleted,
        }) => {
            if deleted > 0 {
                progress.report(Metric::ObjectsDeleted, deleted);
            }
            if !not_deleted.is_empty() {
                tracing::warn!(job = %label, failed = not_deleted.len(), "Batch partly deleted");
            }
            let report = JobReport {
                label,
                kind: job.kind(),
                bytes: bytes.reported(),
                deleted,
                not_deleted,
                attempts,
                elapsed: started.elapsed(),
            };
            tracing::debug!(
                job = %report.label,
                attempts,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Job finished"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(job = %label, attempts, error = %e, "Job failed");
            if e.is_per_item() {
                Err(e)
            } else {
                Err(Error::transfer(label, e))
            }
        }
    }
}

/// Run `attempt` until it finishes or moves no bytes for `limit`
///
/// A long transfer that keeps making progress is never cut off; a single
/// request with no byte progress gets `limit` in total.
async fn until_stalled<F, T>(
    attempt: F,
    bytes: &ByteProgress,
    limit: Duration,
    label: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(attempt);
    let mut seen = bytes.attempt_position();
    loop {
        tokio::select! {
            result = &mut attempt => return result,
            _ = tokio::time::sleep(limit) => {
                let position = bytes.attempt_position();
                if position == seen {
                    return Err(Error::Timeout(label.to_string()));
                }
                seen = position;
            }
        }
    }
}

/// What a successful attempt removed
#[derive(Debug, Default)]
struct Cleared {
    deleted: u64,
    not_deleted: Vec<String>,
}

impl Cleared {
    fn count(deleted: u64) -> Self {
        Self {
            deleted,
            not_deleted: Vec::new(),
        }
    }
}

/// One attempt
async fn attempt_once(store: &dyn ObjectStore, job: &Job, bytes: &ByteProgress) -> Result<Cleared> {
    match job {
        Job::Upload {
            source,
            target,
            options,
            ..
        } => {
            store.put_object(target, source, options, bytes).await?;
            Ok(Cleared::default())
        }
        Job::Download { source, target, .. } => {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            store.get_object(source, target, bytes).await?;
            Ok(Cleared::default())
        }
        Job::Copy {
            source,
            target,
            size,
        } => {
            store.copy_object(source, target).await?;
            bytes.advance(*size);
            Ok(Cleared::default())
        }
        Job::DeleteRemote { target } => {
            store.delete_object(target).await?;
            Ok(Cleared::count(1))
        }
        Job::DeleteBatch { bucket, keys } => {
            let deleted: HashSet<String> = store
                .delete_objects(bucket, keys.clone())
                .await?
                .into_iter()
                .collect();
            let not_deleted = keys
                .iter()
                .filter(|key| !deleted.contains(*key))
                .map(|key| format!("s3://{bucket}/{key}"))
                .collect();
            Ok(Cleared {
                deleted: keys.iter().filter(|key| deleted.contains(*key)).count() as u64,
                not_deleted,
            })
        }
        Job::DeleteLocal { target } => match tokio::fs::remove_file(target).await {
            Ok(()) => Ok(Cleared::count(1)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cleared::count(1)),
            Err(e) => Err(Error::transfer(target.display().to_string(), e)),
        },
    }
}

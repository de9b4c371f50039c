//! Single-object operations
//!
//! Each operation is a small session over the same pool and aggregator as a
//! sync, so callers render progress and map outcomes the same way.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::pool::Job;
use crate::progress::{Metric, Phase};
use crate::session::{Outcome, SessionContext, SessionHandle, Summary};
use crate::traits::{ListOptions, ObjectStore, UploadHeaders};

/// Maximum keys per batch delete request
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Upload one local file
///
/// A target key that is empty or ends in `/` gets the file name appended.
pub fn put(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    source: PathBuf,
    target: RemotePath,
    headers: Arc<dyn UploadHeaders>,
) -> Result<SessionHandle> {
    let target = upload_target(&source, target)?;
    let ctx = SessionContext::new(store, config);
    let (progress, cancel) = (ctx.progress.clone(), ctx.cancel.clone());

    Ok(SessionHandle::spawn(progress, cancel, async move {
        let metadata = match tokio::fs::metadata(&source).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return ctx.fail(Error::InvalidAddress(format!(
                    "{} is not a file",
                    source.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ctx.fail(Error::NotFound(source.display().to_string()));
            }
            Err(e) => return ctx.fail(Error::local_read(&source, e)),
        };
        ctx.progress.report(Metric::FilesFound, 1);
        ctx.progress.set_total(Metric::FilesFound, 1);

        let size = metadata.len();
        let options = headers.put_options(&source);
        let job = Job::Upload {
            source,
            target,
            size,
            options,
        };
        execute(ctx, vec![job], Vec::new()).await
    }))
}

/// Download one object
///
/// An existing directory as the destination receives the object's file name.
pub fn get(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    source: RemotePath,
    target: PathBuf,
) -> Result<SessionHandle> {
    let file_name = object_name(&source)?.to_string();
    let target = if target.is_dir() {
        target.join(file_name)
    } else {
        target
    };
    let ctx = SessionContext::new(store, config);
    let (progress, cancel) = (ctx.progress.clone(), ctx.cancel.clone());

    Ok(SessionHandle::spawn(progress, cancel, async move {
        let size = match discover(&ctx, &source).await {
            Ok(size) => size,
            Err(e) => return ctx.fail(e),
        };
        let job = Job::Download {
            source,
            target,
            size,
        };
        execute(ctx, vec![job], Vec::new()).await
    }))
}

/// Server-side copy of one object
pub fn copy(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    source: RemotePath,
    target: RemotePath,
) -> Result<SessionHandle> {
    copy_or_move(store, config, source, target, false)
}

/// Copy one object, then delete the source once the copy succeeded
pub fn move_object(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    source: RemotePath,
    target: RemotePath,
) -> Result<SessionHandle> {
    copy_or_move(store, config, source, target, true)
}

fn copy_or_move(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    source: RemotePath,
    target: RemotePath,
    remove_source: bool,
) -> Result<SessionHandle> {
    let name = object_name(&source)?;
    let target = if target.is_dir() {
        target.join(name)
    } else {
        target
    };
    if target == source {
        return Err(Error::InvalidAddress(format!(
            "source and destination are the same object: {source}"
        )));
    }

    let ctx = SessionContext::new(store, config);
    let (progress, cancel) = (ctx.progress.clone(), ctx.cancel.clone());

    Ok(SessionHandle::spawn(progress, cancel, async move {
        let size = match discover(&ctx, &source).await {
            Ok(size) => size,
            Err(e) => return ctx.fail(e),
        };
        let deletions = if remove_source {
            ctx.progress.set_total(Metric::ObjectsDeleted, 1);
            vec![Job::DeleteRemote {
                target: source.clone(),
            }]
        } else {
            Vec::new()
        };
        let job = Job::Copy {
            source,
            target,
            size,
        };
        execute(ctx, vec![job], deletions).await
    }))
}

/// Delete one object
pub fn delete_object(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    target: RemotePath,
) -> Result<SessionHandle> {
    object_name(&target)?;
    let ctx = SessionContext::new(store, config);
    let (progress, cancel) = (ctx.progress.clone(), ctx.cancel.clone());

    Ok(SessionHandle::spawn(progress, cancel, async move {
        ctx.progress.set_total(Metric::ObjectsDeleted, 1);
        execute(ctx, Vec::new(), vec![Job::DeleteRemote { target }]).await
    }))
}

/// Delete every object under a prefix, in batches
pub fn delete_prefix(
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    prefix: RemotePath,
) -> Result<SessionHandle> {
    if prefix.bucket.is_empty() {
        return Err(Error::InvalidAddress(format!("'{prefix}' is missing a bucket name")));
    }
    let ctx = SessionContext::new(store, config);
    let (progress, cancel) = (ctx.progress.clone(), ctx.cancel.clone());

    Ok(SessionHandle::spawn(progress, cancel, async move {
        let keys = match list_keys(&ctx, &prefix).await {
            Ok(keys) => keys,
            Err(e) => return ctx.fail(e),
        };
        ctx.progress
            .set_total(Metric::ObjectsDeleted, keys.len() as u64);

        let batches = keys
            .chunks(DELETE_BATCH_SIZE)
            .map(|chunk| Job::DeleteBatch {
                bucket: prefix.bucket.clone(),
                keys: chunk.to_vec(),
            })
            .collect();
        execute(ctx, Vec::new(), batches).await
    }))
}

/// Head the source object; its size becomes the byte total
async fn discover(ctx: &SessionContext, source: &RemotePath) -> Result<u64> {
    let info = tokio::select! {
        info = ctx.store.head_object(source) => info?,
        _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
    };
    ctx.progress.report(Metric::ObjectsFound, 1);
    ctx.progress.set_total(Metric::ObjectsFound, 1);
    let size = info.size();
    ctx.progress.set_total(Metric::BytesTransferred, size);
    Ok(size)
}

async fn list_keys(ctx: &SessionContext, prefix: &RemotePath) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut token = None;
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let options = ListOptions {
            recursive: true,
            continuation_token: token.take(),
            ..Default::default()
        };
        let page = ctx
            .store
            .list_objects(prefix, options)
            .await
            .map_err(|e| Error::ListingFailed(e.to_string()))?;

        for item in page.items.into_iter().filter(|i| !i.is_dir) {
            ctx.progress.report(Metric::ObjectsFound, 1);
            keys.push(item.key);
        }
        match page.continuation_token {
            Some(next) if page.truncated => token = Some(next),
            _ => break,
        }
    }
    ctx.progress
        .set_total(Metric::ObjectsFound, keys.len() as u64);
    Ok(keys)
}

/// Run transfers, then deletions only if every transfer succeeded
async fn execute(ctx: SessionContext, transfers: Vec<Job>, deletions: Vec<Job>) -> Outcome {
    let pool = ctx.pool();
    let mut summary = Summary::default();
    let mut errors = Vec::new();

    ctx.progress.advance(Phase::Transferring);
    let mut completed = ctx
        .run_jobs(&pool, transfers, &mut summary, &mut errors)
        .await;

    if completed && errors.is_empty() && !deletions.is_empty() {
        ctx.progress.advance(Phase::Deleting);
        completed = ctx
            .run_jobs(&pool, deletions, &mut summary, &mut errors)
            .await;
    }

    ctx.conclude(summary, errors, completed)
}

fn upload_target(source: &Path, target: RemotePath) -> Result<RemotePath> {
    if !target.is_dir() {
        return Ok(target);
    }
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidAddress(format!("{} has no file name", source.display())))?;
    Ok(target.join(name))
}

fn object_name(path: &RemotePath) -> Result<&str> {
    if path.is_dir() {
        return Err(Error::InvalidAddress(format!(
            "'{path}' does not name an object"
        )));
    }
    path.file_name()
        .ok_or_else(|| Error::InvalidAddress(format!("'{path}' does not name an object")))
}

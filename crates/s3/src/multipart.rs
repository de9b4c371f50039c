//! Multipart upload support
//!
//! Files larger than the configured part size are uploaded in parts. The part
//! size comes from [`s3sync_core::hash::part_size_for`] so the resulting ETag
//! can be reproduced locally when deciding whether to skip a file.

use std::io::SeekFrom;
use std::path::Path;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use s3sync_core::hash::part_size_for;
use s3sync_core::{ByteProgress, Error, PutOptions, RemotePath, Result};

use crate::client::map_sdk_error;

/// Part layout for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// Part size in bytes
    pub part_size: u64,
    /// Number of parts
    pub parts: u64,
    /// Total file size
    pub total_size: u64,
}

impl PartPlan {
    /// Layout for a file of `total_size` bytes with the configured part size
    pub fn for_file(total_size: u64, configured_part_size: u64) -> Self {
        let part_size = part_size_for(total_size, configured_part_size);
        Self {
            part_size,
            parts: total_size.div_ceil(part_size).max(1),
            total_size,
        }
    }

    /// Byte range `[start, end)` of a 1-based part number
    pub fn byte_range(&self, part_number: u64) -> (u64, u64) {
        let start = (part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.total_size);
        (start, end)
    }
}

/// Upload `source` in parts; returns the ETag of the completed object
pub(crate) async fn upload(
    client: &aws_sdk_s3::Client,
    path: &RemotePath,
    source: &Path,
    plan: PartPlan,
    options: &PutOptions,
    progress: &ByteProgress,
) -> Result<Option<String>> {
    let request = client
        .create_multipart_upload()
        .bucket(&path.bucket)
        .key(&path.key);
    let response = crate::apply_put_options!(request, options)
        .send()
        .await
        .map_err(|e| map_sdk_error(e, path))?;
    let upload_id = response
        .upload_id()
        .ok_or_else(|| Error::Network(format!("{path}: no upload id returned")))?
        .to_string();

    tracing::debug!(target = %path, parts = plan.parts, part_size = plan.part_size, "Multipart upload started");

    let mut pending = PendingUpload::new(client, path, &upload_id);
    match upload_parts(client, path, source, plan, &upload_id, progress).await {
        Ok(parts) => {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build();
            let response = client
                .complete_multipart_upload()
                .bucket(&path.bucket)
                .key(&path.key)
                .upload_id(&upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, path))?;
            pending.disarm();
            Ok(response.e_tag().map(|e| e.trim_matches('"').to_string()))
        }
        Err(e) => {
            pending.abort().await;
            Err(e)
        }
    }
}

/// An upload id that must be aborted unless the upload completes
///
/// Dropping it while armed, for example when the attempt future is dropped
/// on a timeout or cancellation, spawns the abort on the current runtime.
struct PendingUpload {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl PendingUpload {
    fn new(client: &aws_sdk_s3::Client, path: &RemotePath, upload_id: &str) -> Self {
        Self {
            client: client.clone(),
            bucket: path.bucket.clone(),
            key: path.key.clone(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn abort(&mut self) {
        self.armed = false;
        abort_upload(&self.client, &self.bucket, &self.key, &self.upload_id).await;
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(bucket = %self.bucket, key = %self.key, upload_id = %self.upload_id, "Multipart upload left open");
            return;
        };
        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            abort_upload(&client, &bucket, &key, &upload_id).await;
        });
    }
}

async fn abort_upload(client: &aws_sdk_s3::Client, bucket: &str, key: &str, upload_id: &str) {
    let result = client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await;
    match result {
        Ok(_) => tracing::debug!(bucket, key, "Multipart upload aborted"),
        Err(e) => tracing::warn!(bucket, key, error = %e, "Failed to abort multipart upload"),
    }
}

async fn upload_parts(
    client: &aws_sdk_s3::Client,
    path: &RemotePath,
    source: &Path,
    plan: PartPlan,
    upload_id: &str,
    progress: &ByteProgress,
) -> Result<Vec<CompletedPart>> {
    let mut file = tokio::fs::File::open(source)
        .await
        .map_err(|e| Error::local_read(source, e))?;
    let mut parts = Vec::with_capacity(plan.parts as usize);

    for part_number in 1..=plan.parts {
        let data = read_part(&mut file, plan, part_number)
            .await
            .map_err(|e| Error::local_read(source, e))?;
        let len = data.len() as u64;

        let response = client
            .upload_part()
            .bucket(&path.bucket)
            .key(&path.key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        progress.advance(len);
        parts.push(
            CompletedPart::builder()
                .part_number(part_number as i32)
                .set_e_tag(response.e_tag().map(str::to_string))
                .build(),
        );
    }

    Ok(parts)
}

async fn read_part(
    file: &mut tokio::fs::File,
    plan: PartPlan,
    part_number: u64,
) -> std::io::Result<Bytes> {
    let (start, end) = plan.byte_range(part_number);
    let mut buf = vec![0u8; (end - start) as usize];
    file.seek(SeekFrom::Start(start)).await?;
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

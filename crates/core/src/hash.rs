//! Content hashing
//!
//! Local digests are computed in the form S3 reports as an ETag: the hex MD5
//! of the content for single-part objects, and `md5(part digests)-N` for
//! multipart objects.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::progress::ByteProgress;

const READ_BUF: usize = 1024 * 1024;

/// Minimum part size: 5 MiB (S3 requirement)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: u64 = 10_000;

/// Part size the uploader uses for a file of `file_size` bytes
pub fn part_size_for(file_size: u64, configured: u64) -> u64 {
    let configured = configured.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
    if file_size.div_ceil(configured) <= MAX_PARTS {
        configured
    } else {
        file_size
            .div_ceil(MAX_PARTS)
            .clamp(MIN_PART_SIZE, MAX_PART_SIZE)
    }
}

/// Whether a file of `file_size` bytes is uploaded in parts
pub fn is_multipart(file_size: u64, configured: u64) -> bool {
    file_size > configured.clamp(MIN_PART_SIZE, MAX_PART_SIZE)
}

/// Number of parts encoded in a multipart ETag (`…-N`)
pub fn etag_part_count(etag: &str) -> Option<u64> {
    let (_, count) = etag.trim_matches('"').rsplit_once('-')?;
    count.parse().ok()
}

/// Hex MD5 of a file
pub async fn md5_file(path: &Path, progress: &ByteProgress) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        progress.advance(n as u64);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Multipart ETag of a file split into `part_size` chunks
pub async fn multipart_etag(
    path: &Path,
    part_size: u64,
    progress: &ByteProgress,
) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut combined = Md5::new();
    let mut part = Md5::new();
    let mut in_part = 0u64;
    let mut parts = 0u64;
    let mut buf = vec![0u8; READ_BUF];

    loop {
        let want = (part_size - in_part).min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        part.update(&buf[..n]);
        in_part += n as u64;
        progress.advance(n as u64);

        if in_part == part_size {
            combined.update(part.finalize_reset());
            parts += 1;
            in_part = 0;
        }
    }
    if in_part > 0 || parts == 0 {
        combined.update(part.finalize());
        parts += 1;
    }

    Ok(format!("{}-{parts}", hex::encode(combined.finalize())))
}

/// Whether a local file's content matches a remote ETag
///
/// Multipart ETags are recomputed with the uploader's part size; a part count
/// that does not match is treated as different content.
pub async fn matches_etag(
    path: &Path,
    file_size: u64,
    etag: &str,
    configured_part_size: u64,
    progress: &ByteProgress,
) -> std::io::Result<bool> {
    let etag = etag.trim_matches('"');
    match etag_part_count(etag) {
        Some(remote_parts) => {
            let part_size = part_size_for(file_size, configured_part_size);
            if file_size.div_ceil(part_size).max(1) != remote_parts {
                return Ok(false);
            }
            let local = multipart_etag(path, part_size, progress).await?;
            Ok(local.eq_ignore_ascii_case(etag))
        }
        None => {
            let local = md5_file(path, progress).await?;
            Ok(local.eq_ignore_ascii_case(etag))
        }
    }
}

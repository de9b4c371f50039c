//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from s3sync-core.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncWriteExt;

use s3sync_core::hash::is_multipart;
use s3sync_core::{
    ByteProgress, ClientConfig, Error, ListOptions, ListResult, ObjectInfo, ObjectStore,
    PutOptions, RemotePath, Result,
};

use crate::multipart::{self, PartPlan};

/// Endpoint used with `insecure` when no endpoint is configured
const PLAIN_HTTP_AWS: &str = "http://s3.amazonaws.com";

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    part_size: u64,
}

impl S3Client {
    /// Create a new S3 client from client settings
    ///
    /// Static keys from the configuration take precedence; without them the
    /// AWS default credential chain is used. Retries are left to the transfer
    /// pool, so the SDK's own retry layer is disabled.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(std::time::Duration::from_millis(config.timeout.connect_ms))
            .read_timeout(std::time::Duration::from_millis(config.timeout.read_ms))
            .build();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.endpoint.region.clone()))
            .retry_config(aws_config::retry::RetryConfig::disabled())
            .timeout_config(timeouts);

        if let Some((access_key, secret_key)) = config.credentials.static_keys() {
            let credentials = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None, // session token
                None, // expiry
                "s3sync-static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }

        let endpoint = endpoint_url(&config)?;
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(force_path_style(
                &config.endpoint.bucket_lookup,
                endpoint.is_some(),
            ))
            .build();

        tracing::debug!(
            endpoint = endpoint.as_deref().unwrap_or("aws"),
            region = %config.endpoint.region,
            "S3 client ready"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            part_size: config.part_size,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    async fn put_single(
        &self,
        path: &RemotePath,
        source: &Path,
        options: &PutOptions,
    ) -> Result<Option<String>> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::local_read(source, e))?;
        let request = self
            .inner
            .put_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .body(body);
        let response = crate::apply_put_options!(request, options)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;
        Ok(response.e_tag().map(|e| e.trim_matches('"').to_string()))
    }
}

/// Effective endpoint URL, honoring `insecure`
fn endpoint_url(config: &ClientConfig) -> Result<Option<String>> {
    let Some(raw) = config.endpoint.url.as_deref() else {
        return Ok(config.insecure.then(|| PLAIN_HTTP_AWS.to_string()));
    };

    let mut url = url::Url::parse(raw)?;
    if config.insecure && url.scheme() == "https" {
        url.set_scheme("http")
            .map_err(|_| Error::Config(format!("cannot use plain HTTP with {raw}")))?;
    }
    Ok(Some(url.as_str().trim_end_matches('/').to_string()))
}

/// Path-style addressing for custom endpoints unless DNS lookup is requested
fn force_path_style(bucket_lookup: &str, custom_endpoint: bool) -> bool {
    match bucket_lookup {
        "path" => true,
        "dns" => false,
        _ => custom_endpoint,
    }
}

/// Map an SDK failure onto the core error kinds
pub(crate) fn map_sdk_error<E>(err: E, context: impl std::fmt::Display) -> Error
where
    E: std::error::Error,
{
    let message = DisplayErrorContext(&err).to_string();
    classify(&message, &context.to_string())
}

fn classify(message: &str, context: &str) -> Error {
    if message.contains("NotFound") || message.contains("NoSuchKey") || message.contains("NoSuchBucket") {
        Error::NotFound(context.to_string())
    } else if message.contains("AccessDenied")
        || message.contains("InvalidAccessKeyId")
        || message.contains("SignatureDoesNotMatch")
        || message.contains("ExpiredToken")
    {
        Error::Auth(format!("{context}: {message}"))
    } else {
        Error::Network(format!("{context}: {message}"))
    }
}

fn timestamp(value: &aws_smithy_types::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::new(value.secs(), value.subsec_nanos() as i32).ok()
}

/// Temporary sibling a download streams into before being renamed into place
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.s3sync-partial"))
}

/// Encode a `CopySource` value, keeping `/` and unreserved characters
fn copy_source(src: &RemotePath) -> String {
    let mut encoded = String::with_capacity(src.bucket.len() + src.key.len() + 1);
    encoded.push_str(&src.bucket);
    encoded.push('/');
    for byte in src.key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        let mut request = self.inner.list_objects_v2().bucket(&path.bucket);

        if !path.key.is_empty() {
            request = request.prefix(&path.key);
        }

        // Set delimiter (for non-recursive listing)
        if !options.recursive {
            request = request.delimiter(options.delimiter.as_deref().unwrap_or("/"));
        }

        if let Some(max) = options.max_keys {
            request = request.max_keys(max);
        }

        if let Some(token) = &options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        let mut items = Vec::new();

        // Add common prefixes (directories)
        for prefix in response.common_prefixes() {
            if let Some(p) = prefix.prefix() {
                items.push(ObjectInfo::dir(p));
            }
        }

        for object in response.contents() {
            let key = object.key().unwrap_or_default();
            let mut info = ObjectInfo::file(key, object.size().unwrap_or(0));
            info.last_modified = object.last_modified().and_then(timestamp);
            if let Some(etag) = object.e_tag() {
                info = info.with_etag(etag);
            }
            items.push(info);
        }

        Ok(ListResult {
            items,
            truncated: response.is_truncated().unwrap_or(false),
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        let response = self
            .inner
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        let mut info = ObjectInfo::file(&path.key, response.content_length().unwrap_or(0));
        info.last_modified = response.last_modified().and_then(timestamp);
        if let Some(etag) = response.e_tag() {
            info = info.with_etag(etag);
        }
        info.content_type = response.content_type().map(str::to_string);
        Ok(info)
    }

    async fn get_object(
        &self,
        path: &RemotePath,
        destination: &Path,
        progress: &ByteProgress,
    ) -> Result<ObjectInfo> {
        let response = self
            .inner
            .get_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        let mut info = ObjectInfo::file(&path.key, response.content_length().unwrap_or(0));
        info.last_modified = response.last_modified().and_then(timestamp);
        if let Some(etag) = response.e_tag() {
            info = info.with_etag(etag);
        }
        info.content_type = response.content_type().map(str::to_string);

        let partial = partial_path(destination);
        let mut body = response.body;
        let written: Result<()> = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| Error::Network(format!("{path}: {e}")))?
            {
                file.write_all(&chunk).await?;
                progress.advance(chunk.len() as u64);
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, destination).await?;
        Ok(info)
    }

    async fn put_object(
        &self,
        path: &RemotePath,
        source: &Path,
        options: &PutOptions,
        progress: &ByteProgress,
    ) -> Result<ObjectInfo> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::local_read(source, e))?
            .len();

        let etag = if is_multipart(size, self.part_size) {
            let plan = PartPlan::for_file(size, self.part_size);
            multipart::upload(&self.inner, path, source, plan, options, progress).await?
        } else {
            let etag = self.put_single(path, source, options).await?;
            progress.advance(size);
            etag
        };

        let mut info = ObjectInfo::file(&path.key, size as i64);
        info.etag = etag;
        info.content_type = options.content_type.clone();
        info.last_modified = Some(jiff::Timestamp::now());
        Ok(info)
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<Vec<String>> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        if keys.is_empty() {
            return Ok(vec![]);
        }

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::General(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(|e| Error::General(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, format!("s3://{bucket}/")))?;

        let deleted: Vec<String> = response
            .deleted()
            .iter()
            .filter_map(|d| d.key().map(|k| k.to_string()))
            .collect();

        if !response.errors().is_empty() {
            let error_keys: Vec<&str> = response.errors().iter().filter_map(|e| e.key()).collect();
            tracing::warn!(bucket, keys = ?error_keys, "Failed to delete some objects");
        }

        Ok(deleted)
    }

    async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<ObjectInfo> {
        let response = self
            .inner
            .copy_object()
            .copy_source(copy_source(src))
            .bucket(&dst.bucket)
            .key(&dst.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, src))?;

        // Size comes from head_object since copy doesn't return it
        let mut info = self.head_object(dst).await?;
        if let Some(etag) = response.copy_object_result().and_then(|r| r.e_tag()) {
            info = info.with_etag(etag);
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3sync_core::Config;

    fn client_config(url: Option<&str>, insecure: bool) -> ClientConfig {
        let mut config = Config::default();
        config.endpoint.url = url.map(str::to_string);
        config.transfer.insecure = insecure;
        config.client_config()
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url(&client_config(None, false)).unwrap(), None);
        assert_eq!(
            endpoint_url(&client_config(None, true)).unwrap().as_deref(),
            Some(PLAIN_HTTP_AWS)
        );
        assert_eq!(
            endpoint_url(&client_config(Some("https://minio.local:9000"), true))
                .unwrap()
                .as_deref(),
            Some("http://minio.local:9000")
        );
        assert_eq!(
            endpoint_url(&client_config(Some("https://minio.local:9000/"), false))
                .unwrap()
                .as_deref(),
            Some("https://minio.local:9000")
        );
        assert!(endpoint_url(&client_config(Some("not a url"), false)).is_err());
    }

    #[test]
    fn test_force_path_style() {
        assert!(force_path_style("path", false));
        assert!(!force_path_style("dns", true));
        assert!(force_path_style("auto", true));
        assert!(!force_path_style("auto", false));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify("service error: NoSuchKey: missing", "s3://b/k"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            classify("AccessDenied: nope", "s3://b/k"),
            Error::Auth(_)
        ));
        let err = classify("dispatch failure: connection reset", "s3://b/k");
        assert!(matches!(err, Error::Network(_)));
        assert!(s3sync_core::retry::is_retryable_error(&err));
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/data/photos/a.jpg"));
        assert_eq!(partial, PathBuf::from("/data/photos/.a.jpg.s3sync-partial"));
    }

    #[test]
    fn test_copy_source_encoding() {
        let src = RemotePath::new("bucket", "dir/my file+1.txt");
        assert_eq!(copy_source(&src), "bucket/dir/my%20file%2B1.txt");
    }
}

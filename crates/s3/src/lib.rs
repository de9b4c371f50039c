//! s3sync-s3: S3 SDK adapter for the s3sync CLI
//!
//! This crate provides the implementation of the ObjectStore trait
//! using the aws-sdk-s3 crate. It is the only crate that directly
//! depends on the AWS SDK.

/// Apply upload headers to a `PutObject` or `CreateMultipartUpload` builder
#[macro_export]
#[doc(hidden)]
macro_rules! apply_put_options {
    ($request:expr, $options:expr) => {{
        let options: &s3sync_core::PutOptions = $options;
        let mut request = $request;
        if let Some(value) = &options.content_type {
            request = request.content_type(value);
        }
        if let Some(value) = &options.cache_control {
            request = request.cache_control(value);
        }
        if let Some(value) = &options.content_disposition {
            request = request.content_disposition(value);
        }
        if let Some(value) = &options.content_encoding {
            request = request.content_encoding(value);
        }
        if let Some(value) = &options.content_language {
            request = request.content_language(value);
        }
        for (name, value) in &options.metadata {
            request = request.metadata(name, value);
        }
        request
    }};
}

pub mod client;
pub mod multipart;

pub use client::S3Client;

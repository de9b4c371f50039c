//! put command - Upload one file
//!
//! A destination key ending in `/` (or a bare bucket) receives the file name.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use s3sync_core::{ops, parse_remote};

use super::headers::HeaderArgs;
use super::{ConnectionArgs, open_store, report, watch};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusUnit};

/// Upload one file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file to upload
    pub source: PathBuf,

    /// Destination address (s3://bucket/key or s3://bucket/prefix/)
    pub target: String,

    #[command(flatten)]
    pub headers: HeaderArgs,
}

/// Execute the put command
pub async fn execute(
    args: PutArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let target = match parse_remote(&args.target) {
        Ok(target) => target,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let headers = match args.headers.policy() {
        Ok(policy) => policy,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };

    let (store, config) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let handle = match ops::put(store, config, args.source, target, Arc::new(headers)) {
        Ok(handle) => handle,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let outcome = watch(handle, &formatter, StatusUnit::Bytes).await;
    report(&outcome, &formatter)
}

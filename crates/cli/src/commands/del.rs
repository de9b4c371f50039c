//! del command - Delete objects
//!
//! Deletes a single object, or with `--recursive` every object under the
//! prefix in batches.

use clap::Args;
use s3sync_core::{ops, parse_remote};

use super::{ConnectionArgs, open_store, report, watch};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusUnit};

/// Delete objects
#[derive(Args, Debug)]
pub struct DelArgs {
    /// S3 address of the object or prefix (s3://bucket/key)
    pub path: String,

    /// Delete every object under the prefix
    #[arg(short, long)]
    pub recursive: bool,
}

/// Execute the del command
pub async fn execute(
    args: DelArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let target = match parse_remote(&args.path) {
        Ok(target) => target,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    let (store, config) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let started = if args.recursive {
        ops::delete_prefix(store, config, target)
    } else {
        ops::delete_object(store, config, target)
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let outcome = watch(handle, &formatter, StatusUnit::Objects).await;
    report(&outcome, &formatter)
}

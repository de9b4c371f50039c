//! cp command - Server-side copy of one object
//!
//! Both sides must be S3 addresses; the data never leaves the service.

use clap::Args;
use s3sync_core::{ops, parse_remote};

use super::{ConnectionArgs, open_store, report, watch};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusUnit};

/// Copy one object
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source object (s3://bucket/key)
    pub source: String,

    /// Destination object, or a prefix ending in `/`
    pub target: String,
}

/// Execute the cp command
pub async fn execute(
    args: CpArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    transfer(args, connection, output_config, false).await
}

/// Copy, optionally removing the source after a successful copy
pub(super) async fn transfer(
    args: CpArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
    remove_source: bool,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (source, target) = match (parse_remote(&args.source), parse_remote(&args.target)) {
        (Ok(source), Ok(target)) => (source, target),
        (Err(e), _) | (_, Err(e)) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    let (store, config) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let started = if remove_source {
        ops::move_object(store, config, source, target)
    } else {
        ops::copy(store, config, source, target)
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let outcome = watch(handle, &formatter, StatusUnit::Bytes).await;
    report(&outcome, &formatter)
}

//! mv command - Move one object
//!
//! A server-side copy followed by deletion of the source. The source is kept
//! when the copy fails.

use clap::Args;

use super::ConnectionArgs;
use super::cp::{self, CpArgs};
use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

/// Move one object
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Source object (s3://bucket/key)
    pub source: String,

    /// Destination object, or a prefix ending in `/`
    pub target: String,
}

/// Execute the mv command
pub async fn execute(
    args: MvArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let args = CpArgs {
        source: args.source,
        target: args.target,
    };
    cp::transfer(args, connection, output_config, true).await
}

//! get command - Download one object
//!
//! Without a destination the object is saved under its base name in the
//! current directory.

use std::path::PathBuf;

use clap::Args;
use s3sync_core::{RemotePath, ops, parse_remote};

use super::{ConnectionArgs, open_store, report, watch};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusUnit};

/// Download one object
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Object address (s3://bucket/key)
    pub source: String,

    /// Local destination file or directory
    pub target: Option<PathBuf>,
}

/// Execute the get command
pub async fn execute(
    args: GetArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let source = match parse_remote(&args.source) {
        Ok(source) => source,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let target = match destination(&source, args.target) {
        Some(target) => target,
        None => {
            formatter.error(&format!("{source} does not name an object"));
            return ExitCode::UsageError;
        }
    };

    let (store, config) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let handle = match ops::get(store, config, source, target) {
        Ok(handle) => handle,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let outcome = watch(handle, &formatter, StatusUnit::Bytes).await;
    report(&outcome, &formatter)
}

/// Explicit destination, else the object's base name
fn destination(source: &RemotePath, target: Option<PathBuf>) -> Option<PathBuf> {
    match target {
        Some(target) => Some(target),
        None if source.is_dir() => None,
        None => source.file_name().map(PathBuf::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_destination_is_base_name() {
        let source = RemotePath::new("bucket", "backups/2024/db.tar.gz");
        assert_eq!(
            destination(&source, None),
            Some(PathBuf::from("db.tar.gz"))
        );
    }

    #[test]
    fn test_explicit_destination_wins() {
        let source = RemotePath::new("bucket", "backups/db.tar.gz");
        assert_eq!(
            destination(&source, Some(PathBuf::from("/tmp/restore.tgz"))),
            Some(PathBuf::from("/tmp/restore.tgz"))
        );
    }

    #[test]
    fn test_prefix_has_no_default_destination() {
        let source = RemotePath::new("bucket", "backups/");
        assert_eq!(destination(&source, None), None);
    }
}

//! sync command - Mirror a local directory and an S3 prefix
//!
//! Exactly one side must be an `s3://` address; the direction follows from
//! which side it is.

use std::sync::Arc;

use clap::Args;
use s3sync_core::{SyncRequest, SyncSession};

use super::headers::HeaderArgs;
use super::{ConnectionArgs, open_store, report, watch};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusUnit};

/// Sync a local directory with an S3 prefix
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source (local directory or s3://bucket/prefix)
    pub source: String,

    /// Destination (local directory or s3://bucket/prefix)
    pub destination: String,

    /// Delete destination entries that no longer exist at the source
    #[arg(long)]
    pub delete_removed: bool,

    /// Compare by size only, skipping content hashes
    #[arg(long)]
    pub no_hash: bool,

    /// Show what would be transferred or deleted without doing it
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub headers: HeaderArgs,
}

/// Execute the sync command
pub async fn execute(
    args: SyncArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let headers = match args.headers.policy() {
        Ok(policy) => policy,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };

    let (store, mut config) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };
    if args.no_hash {
        config.hash_check = false;
    }

    let mut request = SyncRequest::new(args.source, args.destination);
    request.delete_removed = args.delete_removed;
    request.dry_run = args.dry_run;
    request.headers = Arc::new(headers);

    let session = match SyncSession::new(request, store, config) {
        Ok(session) => session,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };
    tracing::debug!(direction = ?session.direction(), "Sync session created");

    let outcome = watch(session.spawn(), &formatter, StatusUnit::Bytes).await;
    report(&outcome, &formatter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> SyncArgs {
        let mut argv = vec!["s3", "sync"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Sync(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_sync_flags() {
        let args = parse(&[
            "s3://bucket/backup/",
            "./restore",
            "--delete-removed",
            "--no-hash",
            "--dry-run",
        ]);
        assert_eq!(args.source, "s3://bucket/backup/");
        assert_eq!(args.destination, "./restore");
        assert!(args.delete_removed);
        assert!(args.no_hash);
        assert!(args.dry_run);
    }

    #[test]
    fn test_parse_repeated_headers() {
        let args = parse(&[
            "./site",
            "s3://bucket/www",
            "--add-header",
            "Cache-Control: max-age=60",
            "--add-header",
            "x-amz-meta-build: 42",
            "--no-guess-mime-type",
        ]);
        assert_eq!(args.headers.add_header.len(), 2);
        assert!(args.headers.no_guess_mime_type);
        assert!(args.headers.policy().is_ok());
    }

    #[tokio::test]
    async fn test_two_local_paths_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let connection = ConnectionArgs {
            config: Some(dir.path().join("config.toml")),
            ..Default::default()
        };
        let args = parse(&["./a", "./b"]);
        let code = execute(
            args,
            &connection,
            OutputConfig {
                quiet: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(code, ExitCode::UsageError);
    }
}

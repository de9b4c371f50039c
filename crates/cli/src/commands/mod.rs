//! CLI command definitions and execution
//!
//! Every transfer command starts a session in s3sync-core, draws the status
//! line while it runs and maps the outcome to an exit code.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use s3sync_core::{
    Config, ConfigManager, ObjectStore, Outcome, SessionHandle, Summary, TransferConfig,
};
use s3sync_s3::S3Client;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, StatusLine, StatusUnit};

mod completions;
mod cp;
mod del;
mod get;
mod headers;
mod ls;
mod mv;
mod put;
mod sync;

/// s3 - sync a local directory with an S3 prefix
///
/// Also lists, uploads, downloads, copies, moves and deletes single objects.
#[derive(Parser, Debug)]
#[command(name = "s3")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable the status line
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that shape the client and the transfer pool
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Configuration file (default: ~/.config/s3sync/config.toml)
    #[arg(long, global = true, env = "S3SYNC_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// s3cmd-style credentials file used when the configuration has no keys
    /// (default: ~/.s3cfg)
    #[arg(long, global = true, env = "S3SYNC_S3CFG", value_name = "PATH")]
    pub s3cmd_config: Option<PathBuf>,

    /// Maximum number of concurrent transfers
    #[arg(long, global = true, value_name = "N")]
    pub max_sockets: Option<usize>,

    /// Use plain HTTP instead of HTTPS
    #[arg(long, global = true, default_value = "false")]
    pub insecure: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync a local directory with an S3 prefix (either direction)
    Sync(sync::SyncArgs),

    /// List objects and common prefixes
    Ls(ls::LsArgs),

    /// Delete an object, or every object under a prefix
    Del(del::DelArgs),

    /// Upload one file
    Put(put::PutArgs),

    /// Download one object
    Get(get::GetArgs),

    /// Server-side copy of one object
    Cp(cp::CpArgs),

    /// Copy one object, then delete the source
    Mv(mv::MvArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };
    let connection = cli.connection;

    match cli.command {
        Commands::Sync(args) => sync::execute(args, &connection, output_config).await,
        Commands::Ls(args) => ls::execute(args, &connection, output_config).await,
        Commands::Del(args) => del::execute(args, &connection, output_config).await,
        Commands::Put(args) => put::execute(args, &connection, output_config).await,
        Commands::Get(args) => get::execute(args, &connection, output_config).await,
        Commands::Cp(args) => cp::execute(args, &connection, output_config).await,
        Commands::Mv(args) => mv::execute(args, &connection, output_config).await,
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Load the configuration file and apply command-line overrides
pub(crate) fn load_config(connection: &ConnectionArgs) -> anyhow::Result<Config> {
    let mut manager = match &connection.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new().context("Failed to locate configuration")?,
    };
    if let Some(path) = &connection.s3cmd_config {
        manager = manager.with_s3cmd_path(path.clone());
    }
    let mut config = manager.load().with_context(|| {
        format!(
            "Failed to load configuration from {}",
            manager.config_path().display()
        )
    })?;

    if let Some(max_sockets) = connection.max_sockets {
        anyhow::ensure!(max_sockets > 0, "--max-sockets must be at least 1");
        config.transfer.max_sockets = max_sockets;
    }
    if connection.insecure {
        config.transfer.insecure = true;
    }
    Ok(config)
}

/// Exit code for an error raised while preparing a command
fn setup_exit_code(error: &anyhow::Error) -> ExitCode {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<s3sync_core::Error>())
        .map(ExitCode::from_error)
        .unwrap_or(ExitCode::UsageError)
}

/// Build the store and transfer settings, printing any failure
pub(crate) async fn open_store(
    connection: &ConnectionArgs,
    formatter: &Formatter,
) -> Result<(Arc<dyn ObjectStore>, TransferConfig), ExitCode> {
    let config = match load_config(connection) {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return Err(setup_exit_code(&e));
        }
    };

    let client = match S3Client::new(config.client_config()).await {
        Ok(client) => client,
        Err(e) => {
            formatter.error(&format!("Failed to create S3 client: {e}"));
            return Err(ExitCode::from_error(&e));
        }
    };

    Ok((Arc::new(client), config.transfer_config()))
}

/// Draw the status line until the session ends; Ctrl+C cancels it
pub(crate) async fn watch(
    handle: SessionHandle,
    formatter: &Formatter,
    unit: StatusUnit,
) -> Outcome {
    let status = StatusLine::start(formatter.config(), handle.progress(), unit);
    tracing::debug!(visible = status.is_visible(), "Status line started");

    let cancel = handle.cancel_token();
    let notice = formatter.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl+C received, cancelling session");
            notice.warning("Interrupted; waiting for in-flight transfers");
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();
    status.finish();
    outcome
}

#[derive(Debug, Serialize)]
struct OutcomeOutput<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a Summary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Print the outcome and return its exit code
pub(crate) fn report(outcome: &Outcome, formatter: &Formatter) -> ExitCode {
    let errors: Vec<String> = match outcome {
        Outcome::PartialFailure { errors, .. } => errors.iter().map(|e| e.to_string()).collect(),
        Outcome::FatalFailure(e) => vec![e.to_string()],
        Outcome::Success(_) => Vec::new(),
    };

    if formatter.is_json() {
        let status = match outcome {
            Outcome::Success(_) => "success",
            Outcome::PartialFailure { .. } => "partial",
            Outcome::FatalFailure(_) => "failed",
        };
        formatter.json(&OutcomeOutput {
            status,
            summary: outcome.summary(),
            errors,
        });
    } else {
        if let Some(summary) = outcome.summary() {
            if summary.dry_run {
                for action in &summary.planned {
                    formatter.println(&format!("{}: {}", action.name(), action.key()));
                }
            }
            let line = describe(summary);
            if outcome.is_success() {
                formatter.success(&line);
            } else {
                formatter.println(&line);
            }
        }
        for error in &errors {
            formatter.error(error);
        }
    }

    match outcome {
        Outcome::FatalFailure(e) => ExitCode::from_error(e),
        _ => ExitCode::from_i32(outcome.exit_code()).unwrap_or(ExitCode::GeneralError),
    }
}

/// One-line human summary of a session
fn describe(summary: &Summary) -> String {
    let mut parts = Vec::new();
    for (count, verb) in [
        (summary.uploaded, "uploaded"),
        (summary.downloaded, "downloaded"),
        (summary.copied, "copied"),
        (summary.deleted, "deleted"),
        (summary.skipped, "unchanged"),
        (summary.failed, "failed"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {verb}"));
        }
    }
    if parts.is_empty() {
        parts.push("nothing to do".to_string());
    }

    let prefix = if summary.dry_run { "Dry run: " } else { "" };
    format!(
        "{prefix}{} ({} in {:.1}s)",
        parts.join(", "),
        humansize::format_size(summary.bytes_transferred, humansize::BINARY),
        summary.elapsed.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use s3sync_core::Error;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "s3",
            "sync",
            "./site",
            "s3://bucket/www/",
            "--max-sockets",
            "8",
            "--insecure",
            "--delete-removed",
        ])
        .unwrap();
        assert_eq!(cli.connection.max_sockets, Some(8));
        assert!(cli.connection.insecure);
        assert!(matches!(cli.command, Commands::Sync(_)));
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.transfer.max_sockets = 4;
        ConfigManager::with_path(path.clone()).save(&config).unwrap();

        let connection = ConnectionArgs {
            config: Some(path.clone()),
            ..Default::default()
        };
        let loaded = load_config(&connection).unwrap();
        assert_eq!(loaded.transfer.max_sockets, 4);
        assert!(!loaded.transfer.insecure);

        let connection = ConnectionArgs {
            config: Some(path),
            max_sockets: Some(12),
            insecure: true,
            ..Default::default()
        };
        let loaded = load_config(&connection).unwrap();
        assert_eq!(loaded.transfer.max_sockets, 12);
        assert!(loaded.transfer.insecure);
    }

    #[test]
    fn test_load_config_rejects_zero_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let connection = ConnectionArgs {
            config: Some(dir.path().join("missing.toml")),
            max_sockets: Some(0),
            ..Default::default()
        };
        let err = load_config(&connection).unwrap_err();
        assert_eq!(setup_exit_code(&err), ExitCode::UsageError);
    }

    #[test]
    fn test_bad_config_file_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[endpoint]\nbucket_lookup = \"sideways\"\n").unwrap();
        let connection = ConnectionArgs {
            config: Some(path),
            ..Default::default()
        };
        let err = load_config(&connection).unwrap_err();
        assert_eq!(setup_exit_code(&err), ExitCode::UsageError);
        assert!(format!("{err:#}").contains("bucket_lookup"));
    }

    #[test]
    fn test_load_config_reads_s3cmd_file() {
        let dir = tempfile::tempdir().unwrap();
        let s3cfg = dir.path().join("s3cfg");
        std::fs::write(&s3cfg, "[default]\naccess_key = AK\nsecret_key = SK\n").unwrap();

        let config = dir.path().join("config.toml").to_string_lossy().into_owned();
        let s3cfg = s3cfg.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "s3",
            "ls",
            "s3://bucket",
            "--config",
            config.as_str(),
            "--s3cmd-config",
            s3cfg.as_str(),
        ])
        .unwrap();
        let loaded = load_config(&cli.connection).unwrap();
        assert_eq!(loaded.credentials.static_keys(), Some(("AK", "SK")));
    }

    #[test]
    fn test_missing_s3cmd_file_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let connection = ConnectionArgs {
            config: Some(dir.path().join("config.toml")),
            s3cmd_config: Some(dir.path().join("absent")),
            ..Default::default()
        };
        let err = load_config(&connection).unwrap_err();
        assert_eq!(setup_exit_code(&err), ExitCode::UsageError);
    }

    #[test]
    fn test_report_partial_failure_exit_code() {
        let outcome = Outcome::PartialFailure {
            summary: Summary {
                uploaded: 2,
                failed: 1,
                ..Default::default()
            },
            errors: vec![Error::transfer("b.txt", "connection reset")],
        };
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        assert_eq!(report(&outcome, &formatter), ExitCode::PartialFailure);
    }

    #[test]
    fn test_report_fatal_failure_exit_code() {
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let outcome = Outcome::FatalFailure(Error::ListingFailed("page 2: reset".into()));
        assert_eq!(report(&outcome, &formatter), ExitCode::NetworkError);
        assert_eq!(
            report(&Outcome::FatalFailure(Error::Cancelled), &formatter),
            ExitCode::Interrupted
        );
    }

    #[test]
    fn test_describe_summary() {
        let summary = Summary {
            uploaded: 1,
            deleted: 1,
            skipped: 1,
            bytes_transferred: 2048,
            ..Default::default()
        };
        let line = describe(&summary);
        assert!(line.starts_with("1 uploaded, 1 deleted, 1 unchanged"), "{line}");
        assert!(line.contains("KiB"), "{line}");

        let empty = describe(&Summary {
            dry_run: true,
            ..Default::default()
        });
        assert!(empty.starts_with("Dry run: nothing to do"), "{empty}");
    }
}

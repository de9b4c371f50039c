//! ls command - List objects under an S3 prefix
//!
//! Without `--recursive`, keys are grouped at the next `/` and the groups are
//! printed as `DIR` lines.

use clap::Args;
use s3sync_core::{ListOptions, ObjectInfo, ObjectStore, RemotePath, Result, parse_remote};
use serde::Serialize;

use super::{ConnectionArgs, open_store};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

const PAGE_SIZE: i32 = 1000;

/// List objects
#[derive(Args, Debug)]
pub struct LsArgs {
    /// S3 address (s3://bucket/prefix)
    pub path: String,

    /// List every key under the prefix instead of grouping by `/`
    #[arg(short, long)]
    pub recursive: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ObjectInfo>,
    total_objects: usize,
    total_size_bytes: u64,
}

/// Execute the ls command
pub async fn execute(
    args: LsArgs,
    connection: &ConnectionArgs,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match parse_remote(&args.path) {
        Ok(path) => path,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    let (store, _) = match open_store(connection, &formatter).await {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let mut items = Vec::new();
    let listed = list_pages(store.as_ref(), &path, args.recursive, |page| {
        if formatter.is_json() {
            items.extend_from_slice(page);
        } else {
            for item in page {
                formatter.println(&format_entry(item));
            }
        }
    })
    .await;

    if let Err(e) = listed {
        formatter.error(&format!("Failed to list {path}: {e}"));
        return ExitCode::from_error(&e);
    }

    if formatter.is_json() {
        let objects = items.iter().filter(|i| !i.is_dir);
        let output = LsOutput {
            total_objects: objects.clone().count(),
            total_size_bytes: objects.map(ObjectInfo::size).sum(),
            items,
        };
        formatter.json(&output);
    }

    ExitCode::Success
}

/// Walk every page of a listing, handing each page to `on_page`
async fn list_pages<F>(
    store: &dyn ObjectStore,
    path: &RemotePath,
    recursive: bool,
    mut on_page: F,
) -> Result<usize>
where
    F: FnMut(&[ObjectInfo]),
{
    let mut continuation_token = None;
    let mut total = 0;

    loop {
        let options = ListOptions {
            max_keys: Some(PAGE_SIZE),
            recursive,
            continuation_token: continuation_token.take(),
            ..Default::default()
        };
        let page = store.list_objects(path, options).await?;
        tracing::debug!(items = page.items.len(), truncated = page.truncated, "Listed page");
        total += page.items.len();
        on_page(&page.items);

        match page.continuation_token {
            Some(token) if page.truncated => continuation_token = Some(token),
            _ => break,
        }
    }

    Ok(total)
}

/// One listing line: `DIR <prefix>` or `<last modified> <size> <key>`
fn format_entry(item: &ObjectInfo) -> String {
    if item.is_dir {
        return format!("DIR {}", item.key);
    }
    let date = item
        .last_modified
        .map(|d| d.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| " ".repeat(19));
    format!("{date} {:>12} {}", item.size(), item.key)
}

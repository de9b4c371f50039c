//! s3sync-core: synchronization engine for the s3sync CLI
//!
//! This crate provides:
//! - Path parsing and key resolution between a local tree and a remote prefix
//! - The tree differ that decides what to transfer, skip or delete
//! - A bounded-concurrency transfer pool with retry and timeouts
//! - The progress aggregator sampled by status renderers
//! - Sync sessions and single-object operations
//! - Configuration management
//! - The ObjectStore trait implemented by storage backends
//!
//! This crate is independent of any specific S3 SDK, so the engine can be
//! tested against in-memory and mock stores.

pub mod config;
pub mod differ;
pub mod error;
pub mod hash;
pub mod ops;
pub mod path;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ClientConfig, Config, ConfigManager, TransferConfig};
pub use differ::{ActionPlan, DiffOptions, Differ, Direction, Entry, Origin, SyncAction};
pub use error::{Error, Result};
pub use path::{KeyResolver, ParsedPath, RemotePath, parse_address, parse_remote};
pub use pool::{Job, JobKind, JobReport, Task, TransferPool};
pub use progress::{ByteProgress, Metric, MetricValue, Phase, ProgressAggregator, Snapshot, Terminal};
pub use session::{Outcome, SessionHandle, Summary, SyncRequest, SyncSession};
pub use traits::{ListOptions, ListResult, ObjectInfo, ObjectStore, PutOptions, UploadHeaders};

//! Tree differ
//!
//! Compares a local enumeration with a remote listing and produces the action
//! set for one direction. The plan is keyed by relative key, so every key has
//! at most one action.

use std::collections::btree_map::Entry as Slot;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hash;
use crate::path::{KeyResolver, RemotePath};
use crate::progress::{ByteProgress, Metric, ProgressAggregator};
use crate::traits::{ListOptions, ObjectInfo, ObjectStore};

const LIST_PAGE_SIZE: i32 = 1000;

/// Which side an entry was enumerated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// One file or object, addressed by its relative key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub relative_key: String,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,
    /// ETag for remote entries; filled for local entries once hashed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Entry {
    pub fn local(relative_key: impl Into<String>, size: u64) -> Self {
        Self {
            relative_key: relative_key.into(),
            origin: Origin::Local,
            size: Some(size),
            last_modified: None,
            content_hash: None,
        }
    }

    pub fn remote(relative_key: impl Into<String>, object: &ObjectInfo) -> Self {
        Self {
            relative_key: relative_key.into(),
            origin: Origin::Remote,
            size: object.size_bytes.map(|s| s.max(0) as u64),
            last_modified: object.last_modified,
            content_hash: object.etag.clone(),
        }
    }
}

/// One unit of sync work for a single relative key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "entry", rename_all = "snake_case")]
pub enum SyncAction {
    Upload(Entry),
    Download(Entry),
    DeleteRemote(Entry),
    DeleteLocal(Entry),
    Skip(Entry),
}

impl SyncAction {
    pub fn entry(&self) -> &Entry {
        match self {
            SyncAction::Upload(e)
            | SyncAction::Download(e)
            | SyncAction::DeleteRemote(e)
            | SyncAction::DeleteLocal(e)
            | SyncAction::Skip(e) => e,
        }
    }

    pub fn key(&self) -> &str {
        &self.entry().relative_key
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, SyncAction::Upload(_) | SyncAction::Download(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, SyncAction::DeleteRemote(_) | SyncAction::DeleteLocal(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Upload(_) => "upload",
            SyncAction::Download(_) => "download",
            SyncAction::DeleteRemote(_) => "delete-remote",
            SyncAction::DeleteLocal(_) => "delete-local",
            SyncAction::Skip(_) => "skip",
        }
    }
}

/// Direction of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local tree is the source
    Upload,
    /// Remote prefix is the source
    Download,
}

/// Options for one differ pass
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub direction: Direction,
    pub delete_removed: bool,
    pub hash_check: bool,
    /// Uploader part size, needed to reproduce multipart ETags
    pub part_size: u64,
    /// Files hashed at once after the listing completes
    pub hash_concurrency: usize,
}

impl DiffOptions {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            delete_removed: false,
            hash_check: true,
            part_size: crate::config::DEFAULT_PART_SIZE_MIB * 1024 * 1024,
            hash_concurrency: 4,
        }
    }
}

/// Counts of each action kind in a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub uploads: usize,
    pub downloads: usize,
    pub deletes: usize,
    pub skips: usize,
}

/// The complete, de-duplicated action set of one pass
#[derive(Debug, Default)]
pub struct ActionPlan {
    actions: BTreeMap<String, SyncAction>,
    errors: Vec<Error>,
}

impl ActionPlan {
    /// Add the action for a key that has none yet
    ///
    /// A second action for the same key is refused and recorded as an error;
    /// the first decision stands.
    fn insert(&mut self, action: SyncAction) {
        match self.actions.entry(action.key().to_string()) {
            Slot::Vacant(slot) => {
                slot.insert(action);
            }
            Slot::Occupied(existing) => {
                tracing::warn!(
                    key = %existing.key(),
                    kept = existing.get().name(),
                    refused = action.name(),
                    "Refusing second action for key"
                );
                self.errors.push(Error::transfer(
                    existing.key().clone(),
                    format!("conflicting {} and {} actions", existing.get().name(), action.name()),
                ));
            }
        }
    }

    /// Actions in relative-key order
    pub fn actions(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions.values()
    }

    pub fn get(&self, key: &str) -> Option<&SyncAction> {
        self.actions.get(key)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Local entries that could not be read, and refused duplicate actions
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for action in self.actions.values() {
            match action {
                SyncAction::Upload(_) => counts.uploads += 1,
                SyncAction::Download(_) => counts.downloads += 1,
                SyncAction::DeleteRemote(_) | SyncAction::DeleteLocal(_) => counts.deletes += 1,
                SyncAction::Skip(_) => counts.skips += 1,
            }
        }
        counts
    }

    pub fn into_parts(self) -> (Vec<SyncAction>, Vec<Error>) {
        (self.actions.into_values().collect(), self.errors)
    }
}

#[derive(Debug, Clone)]
struct LocalFile {
    entry: Entry,
    path: PathBuf,
}

/// A pair whose sizes match and whose content still needs comparing
struct Candidate {
    local: LocalFile,
    remote: Entry,
}

/// Computes the action set for one source/destination pair
pub struct Differ {
    resolver: KeyResolver,
    store: Arc<dyn ObjectStore>,
    progress: Arc<ProgressAggregator>,
    options: DiffOptions,
    cancel: CancellationToken,
}

impl Differ {
    pub fn new(
        resolver: KeyResolver,
        store: Arc<dyn ObjectStore>,
        progress: Arc<ProgressAggregator>,
        options: DiffOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            store,
            progress,
            options,
            cancel,
        }
    }

    /// Walk, list and compare
    ///
    /// Fails with `ListingFailed` if any listing page fails; in that case no
    /// partial plan is returned.
    pub async fn plan(&self) -> Result<ActionPlan> {
        let mut plan = ActionPlan::default();

        let (mut local, local_errors) = self.walk_local().await?;
        plan.errors.extend(local_errors);

        let mut candidates = Vec::new();
        let mut token = None;
        let mut objects_found = 0u64;
        let mut pages = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let options = ListOptions {
                max_keys: Some(LIST_PAGE_SIZE),
                continuation_token: token.take(),
                recursive: true,
                ..Default::default()
            };
            let page = self
                .store
                .list_objects(&self.list_root(), options)
                .await
                .map_err(|e| Error::ListingFailed(format!("page {}: {e}", pages + 1)))?;
            pages += 1;

            tracing::debug!(page = pages, items = page.items.len(), "Listed page");

            for object in page.items.iter().filter(|o| !o.is_dir) {
                objects_found += 1;
                self.progress.report(Metric::ObjectsFound, 1);

                let Some(key) = self.resolver.key_from_remote(&object.key) else {
                    continue;
                };
                if has_empty_segment(&key) {
                    tracing::warn!(key = %object.key, "Skipping object key with an empty path segment");
                    continue;
                }
                if self.options.direction == Direction::Download && !is_safe_key(&key) {
                    tracing::warn!(key = %object.key, "Skipping object key that escapes the sync root");
                    continue;
                }

                let remote = Entry::remote(key, object);
                match local.remove(&remote.relative_key) {
                    Some(file) => self.compare(&mut plan, &mut candidates, file, remote),
                    None => match self.options.direction {
                        Direction::Upload => {
                            if self.options.delete_removed {
                                plan.insert(SyncAction::DeleteRemote(remote));
                            }
                        }
                        Direction::Download => plan.insert(SyncAction::Download(remote)),
                    },
                }
            }

            match page.continuation_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }

        self.progress.set_total(Metric::ObjectsFound, objects_found);
        tracing::info!(objects = objects_found, pages, "Remote listing complete");

        for (_, file) in local {
            match self.options.direction {
                Direction::Upload => plan.insert(SyncAction::Upload(file.entry)),
                Direction::Download => {
                    if self.options.delete_removed {
                        plan.insert(SyncAction::DeleteLocal(file.entry));
                    }
                }
            }
        }

        self.resolve_candidates(&mut plan, candidates).await;
        Ok(plan)
    }

    fn list_root(&self) -> RemotePath {
        RemotePath::new(&self.resolver.remote().bucket, self.resolver.prefix())
    }

    /// Size check now; content check deferred to [`Self::resolve_candidates`]
    fn compare(
        &self,
        plan: &mut ActionPlan,
        candidates: &mut Vec<Candidate>,
        local: LocalFile,
        remote: Entry,
    ) {
        let same_size = local.entry.size == remote.size;
        if same_size && self.options.hash_check && remote.content_hash.is_some() {
            candidates.push(Candidate { local, remote });
        } else if same_size && !self.options.hash_check {
            plan.insert(SyncAction::Skip(self.source_side(local.entry, remote)));
        } else {
            plan.insert(self.transfer(local.entry, remote));
        }
    }

    async fn resolve_candidates(&self, plan: &mut ActionPlan, candidates: Vec<Candidate>) {
        let total: u64 = candidates.iter().filter_map(|c| c.local.entry.size).sum();
        self.progress.set_total(Metric::BytesHashed, total);
        if candidates.is_empty() {
            return;
        }

        let part_size = self.options.part_size;
        let progress = self.progress.clone();
        let mut results = futures::stream::iter(candidates)
            .map(|candidate| {
                let progress = progress.clone();
                async move {
                    let size = candidate.local.entry.size.unwrap_or(0);
                    let bytes = ByteProgress::new(progress, Metric::BytesHashed, Some(size));
                    let etag = candidate.remote.content_hash.clone().unwrap_or_default();
                    let matched =
                        hash::matches_etag(&candidate.local.path, size, &etag, part_size, &bytes)
                            .await;
                    (candidate, matched)
                }
            })
            .buffer_unordered(self.options.hash_concurrency.max(1));

        while let Some((candidate, matched)) = results.next().await {
            match matched {
                Ok(true) => {
                    let mut local = candidate.local.entry;
                    local.content_hash = candidate.remote.content_hash.clone();
                    plan.insert(SyncAction::Skip(self.source_side(local, candidate.remote)));
                }
                Ok(false) => plan.insert(self.transfer(candidate.local.entry, candidate.remote)),
                Err(e) => {
                    tracing::warn!(path = %candidate.local.path.display(), error = %e, "Cannot hash file");
                    plan.errors.push(Error::local_read(&candidate.local.path, e));
                }
            }
        }
    }

    fn source_side(&self, local: Entry, remote: Entry) -> Entry {
        match self.options.direction {
            Direction::Upload => local,
            Direction::Download => remote,
        }
    }

    fn transfer(&self, local: Entry, remote: Entry) -> SyncAction {
        match self.options.direction {
            Direction::Upload => SyncAction::Upload(local),
            Direction::Download => SyncAction::Download(remote),
        }
    }

    /// Walk the local tree on a blocking thread
    async fn walk_local(&self) -> Result<(BTreeMap<String, LocalFile>, Vec<Error>)> {
        let root = self.resolver.local_root().to_path_buf();
        if !root.exists() {
            if self.options.direction == Direction::Upload {
                return Err(Error::NotFound(format!("{} does not exist", root.display())));
            }
            self.progress.set_total(Metric::FilesFound, 0);
            return Ok((BTreeMap::new(), Vec::new()));
        }

        let resolver = self.resolver.clone();
        let progress = self.progress.clone();
        tokio::task::spawn_blocking(move || walk_tree(&resolver, &progress))
            .await
            .map_err(|e| Error::General(format!("local walk failed: {e}")))
    }
}

fn walk_tree(
    resolver: &KeyResolver,
    progress: &ProgressAggregator,
) -> (BTreeMap<String, LocalFile>, Vec<Error>) {
    let mut files = BTreeMap::new();
    let mut errors = Vec::new();
    let mut folded: HashMap<String, String> = HashMap::new();

    for item in walkdir::WalkDir::new(resolver.local_root()).follow_links(true) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| resolver.local_root().to_path_buf());
                tracing::warn!(path = %path.display(), error = %e, "Cannot read local entry");
                errors.push(Error::local_read(&path, e));
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let key = match resolver.relative_key(item.path()) {
            Ok(key) if !key.is_empty() => key,
            Ok(_) => continue,
            Err(e) => {
                errors.push(Error::local_read(item.path(), e));
                continue;
            }
        };
        let metadata = match item.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                errors.push(Error::local_read(item.path(), e));
                continue;
            }
        };

        if let Some(other) = folded.insert(key.to_lowercase(), key.clone()) {
            tracing::warn!(
                key = %key,
                other = %other,
                "Local keys differ only in case; they map to distinct remote objects"
            );
        }

        progress.report(Metric::FilesFound, 1);
        let mut entry = Entry::local(key.clone(), metadata.len());
        entry.last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| jiff::Timestamp::try_from(t).ok());
        files.insert(
            key,
            LocalFile {
                entry,
                path: item.into_path(),
            },
        );
    }

    progress.set_total(Metric::FilesFound, files.len() as u64);
    tracing::info!(files = files.len(), "Local walk complete");
    (files, errors)
}

/// Keys like `/a`, `a//b` have no local file of their own
fn has_empty_segment(key: &str) -> bool {
    key.split('/').any(str::is_empty)
}

/// Whether a remote-derived key stays inside the local root
fn is_safe_key(key: &str) -> bool {
    key.split('/').all(|part| part != ".." && part != ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use crate::traits::{ListResult, MockObjectStore};
    use md5::{Digest, Md5};
    use tempfile::TempDir;

    const BUCKET: &str = "bucket";

    fn make_differ(
        root: &Path,
        prefix: &str,
        store: Arc<dyn ObjectStore>,
        options: DiffOptions,
    ) -> (Differ, Arc<ProgressAggregator>) {
        let resolver = KeyResolver::new(root, RemotePath::new(BUCKET, prefix)).unwrap();
        let progress = Arc::new(ProgressAggregator::new());
        let differ = Differ::new(
            resolver,
            store,
            progress.clone(),
            options,
            CancellationToken::new(),
        );
        (differ, progress)
    }

    fn write(dir: &TempDir, key: &str, data: &[u8]) {
        let path = dir.path().join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn names(plan: &ActionPlan) -> Vec<(String, &'static str)> {
        plan.actions()
            .map(|a| (a.key().to_string(), a.name()))
            .collect()
    }

    #[tokio::test]
    async fn test_upload_skips_identical_and_uploads_new() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", b"0123456789");
        write(&dir, "b.txt", b"01234567890123456789");
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "dst/a.txt", b"0123456789");

        let (differ, progress) = make_differ(
            dir.path(),
            "dst",
            store,
            DiffOptions::new(Direction::Upload),
        );
        let plan = differ.plan().await.unwrap();

        assert_eq!(
            names(&plan),
            vec![("a.txt".into(), "skip"), ("b.txt".into(), "upload")]
        );
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.get(Metric::FilesFound).total, Some(2));
        assert_eq!(snapshot.get(Metric::ObjectsFound).total, Some(1));
        assert_eq!(snapshot.get(Metric::BytesHashed).amount, 10);
    }

    #[tokio::test]
    async fn test_same_size_different_content_is_transferred() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", b"aaaa");
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a.txt", b"bbbb");

        let (differ, _) = make_differ(dir.path(), "", store, DiffOptions::new(Direction::Upload));
        let plan = differ.plan().await.unwrap();
        assert_eq!(names(&plan), vec![("a.txt".into(), "upload")]);
    }

    #[tokio::test]
    async fn test_no_hash_skips_on_size_alone() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", b"aaaa");
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a.txt", b"bbbb");

        let mut options = DiffOptions::new(Direction::Upload);
        options.hash_check = false;
        let (differ, progress) = make_differ(dir.path(), "", store, options);
        let plan = differ.plan().await.unwrap();

        assert_eq!(names(&plan), vec![("a.txt".into(), "skip")]);
        assert_eq!(progress.snapshot().get(Metric::BytesHashed).amount, 0);
    }

    #[tokio::test]
    async fn test_delete_removed_in_both_directions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "local-only.txt", b"x");
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "p/remote-only.txt", b"y");

        let mut options = DiffOptions::new(Direction::Upload);
        options.delete_removed = true;
        let (up, _) = make_differ(dir.path(), "p/", store.clone(), options);
        assert_eq!(
            names(&up.plan().await.unwrap()),
            vec![
                ("local-only.txt".into(), "upload"),
                ("remote-only.txt".into(), "delete-remote")
            ]
        );

        let mut options = DiffOptions::new(Direction::Download);
        options.delete_removed = true;
        let (down, _) = make_differ(dir.path(), "p/", store, options);
        assert_eq!(
            names(&down.plan().await.unwrap()),
            vec![
                ("local-only.txt".into(), "delete-local"),
                ("remote-only.txt".into(), "download")
            ]
        );
    }

    #[tokio::test]
    async fn test_without_delete_removed_keys_partition_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "both.txt", b"same");
        write(&dir, "nested/local.txt", b"l");
        let store = Arc::new(MemoryStore::with_page_size(1));
        store.insert(BUCKET, "both.txt", b"same");
        store.insert(BUCKET, "remote.txt", b"r");
        store.insert(BUCKET, "dir/", b"");

        let (differ, _) = make_differ(dir.path(), "", store, DiffOptions::new(Direction::Upload));
        let plan = differ.plan().await.unwrap();

        // remote-only keys produce nothing; each local key appears once
        assert_eq!(
            names(&plan),
            vec![
                ("both.txt".into(), "skip"),
                ("nested/local.txt".into(), "upload")
            ]
        );
    }

    #[tokio::test]
    async fn test_download_ignores_keys_escaping_root() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "p/../evil.txt", b"x");
        store.insert(BUCKET, "p/good.txt", b"x");

        let (differ, _) = make_differ(
            &dir.path().join("missing"),
            "p",
            store,
            DiffOptions::new(Direction::Download),
        );
        let plan = differ.plan().await.unwrap();
        assert_eq!(names(&plan), vec![("good.txt".into(), "download")]);
    }

    #[tokio::test]
    async fn test_upload_from_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (differ, _) = make_differ(
            &dir.path().join("missing"),
            "",
            store,
            DiffOptions::new(Direction::Upload),
        );
        assert!(matches!(differ.plan().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_second_page_failure_aborts_pass() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", b"a");

        let mut store = MockObjectStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_list_objects()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ListResult {
                    items: vec![ObjectInfo::file("a.txt", 1)],
                    truncated: true,
                    continuation_token: Some("next".into()),
                })
            });
        store
            .expect_list_objects()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Network("connection reset".into())));
        store.expect_put_object().never();

        let (differ, progress) = make_differ(
            dir.path(),
            "",
            Arc::new(store),
            DiffOptions::new(Direction::Upload),
        );
        let err = differ.plan().await.unwrap_err();
        assert!(matches!(err, Error::ListingFailed(_)));
        assert_eq!(progress.snapshot().get(Metric::ObjectsFound).total, None);
    }

    #[tokio::test]
    async fn test_multipart_etag_remote_is_compared_by_parts() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 64];
        write(&dir, "a.bin", &data);

        let part = Md5::digest(&data);
        let etag = format!("{}-1", hex::encode(Md5::digest(part)));

        let mut store = MockObjectStore::new();
        store.expect_list_objects().returning(move |_, _| {
            Ok(ListResult {
                items: vec![ObjectInfo::file("a.bin", 64).with_etag(&etag)],
                ..Default::default()
            })
        });

        let (differ, _) = make_differ(
            dir.path(),
            "",
            Arc::new(store),
            DiffOptions::new(Direction::Upload),
        );
        let plan = differ.plan().await.unwrap();
        assert_eq!(names(&plan), vec![("a.bin".into(), "skip")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_case_variants_are_distinct_keys() {
        let dir = TempDir::new().unwrap();
        write(&dir, "Readme.md", b"1");
        write(&dir, "README.md", b"2");
        // Case-insensitive filesystems keep only one of the two
        let expected = std::fs::read_dir(dir.path()).unwrap().count();

        let store = Arc::new(MemoryStore::new());
        let (differ, _) = make_differ(dir.path(), "", store, DiffOptions::new(Direction::Upload));
        let plan = differ.plan().await.unwrap();
        assert_eq!(plan.counts().uploads, expected);
    }

    #[tokio::test]
    async fn test_keys_with_empty_segments_are_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, "x.txt", b"same");
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "backup/x.txt", b"old!");
        store.insert(BUCKET, "backup//x.txt", b"same");
        store.insert(BUCKET, "backup/a//b.txt", b"z");

        let mut options = DiffOptions::new(Direction::Upload);
        options.delete_removed = true;
        let (up, progress) = make_differ(dir.path(), "backup", store.clone(), options);
        let plan = up.plan().await.unwrap();

        // the real object is compared with the local file and nothing else
        assert_eq!(names(&plan), vec![("x.txt".into(), "upload")]);
        assert!(plan.errors().is_empty());
        assert_eq!(progress.snapshot().get(Metric::ObjectsFound).total, Some(3));

        let mut options = DiffOptions::new(Direction::Download);
        options.delete_removed = true;
        let (down, _) = make_differ(dir.path(), "backup", store, options);
        assert_eq!(
            names(&down.plan().await.unwrap()),
            vec![("x.txt".into(), "download")]
        );
    }

    #[test]
    fn test_plan_refuses_second_action_for_key() {
        let mut plan = ActionPlan::default();
        plan.insert(SyncAction::Upload(Entry::local("x.txt", 4)));
        plan.insert(SyncAction::DeleteRemote(Entry::local("x.txt", 4)));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get("x.txt").map(SyncAction::name), Some("upload"));
        assert_eq!(plan.errors().len(), 1);
        assert_eq!(
            plan.errors()[0].to_string(),
            "x.txt: conflicting upload and delete-remote actions"
        );
    }

    #[test]
    fn test_has_empty_segment() {
        assert!(has_empty_segment("/x.txt"));
        assert!(has_empty_segment("a//b"));
        assert!(!has_empty_segment("a/b.txt"));
    }

    #[test]
    fn test_is_safe_key() {
        assert!(is_safe_key("a/b.txt"));
        assert!(is_safe_key("a/..b"));
        assert!(!is_safe_key("../b"));
        assert!(!is_safe_key("a/./b"));
    }
}

//! In-memory object store used by engine tests

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::progress::ByteProgress;
use crate::traits::{ListOptions, ListResult, ObjectInfo, ObjectStore, PutOptions};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified: jiff::Timestamp,
    options: PutOptions,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    page_size: usize,
    failing: Mutex<HashSet<String>>,
    flaky: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
    trickles: Mutex<HashMap<String, (u32, Duration)>>,
    events: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            page_size: 1000,
            ..Default::default()
        }
    }

    pub(crate) fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Default::default()
        }
    }

    pub(crate) fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        let object = StoredObject {
            data: data.to_vec(),
            etag: hex::encode(Md5::digest(data)),
            last_modified: jiff::Timestamp::now(),
            options: PutOptions::default(),
        };
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), object);
    }

    /// Every put/get/copy of `key` fails with a non-retryable error
    pub(crate) fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    /// The next `times` operations on `key` fail with a retryable error
    pub(crate) fn flaky_key(&self, key: &str, times: u32) {
        self.flaky.lock().unwrap().insert(key.to_string(), times);
    }

    /// Operations on `key` take at least `delay`
    pub(crate) fn slow_key(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    /// Uploads of `key` move their bytes in `steps` chunks, `delay` apart
    pub(crate) fn trickle_key(&self, key: &str, steps: u32, delay: Duration) {
        self.trickles
            .lock()
            .unwrap()
            .insert(key.to_string(), (steps.max(1), delay));
    }

    pub(crate) fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub(crate) fn data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub(crate) fn options(&self, bucket: &str, key: &str) -> Option<PutOptions> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.options.clone())
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn event_count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    async fn pause(&self, key: &str) {
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_failures(&self, key: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(Error::Auth(format!("Access Denied: {key}")));
        }
        let mut flaky = self.flaky.lock().unwrap();
        if let Some(remaining) = flaky.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network("connection reset by peer".into()));
            }
        }
        Ok(())
    }

    fn info(key: &str, object: &StoredObject) -> ObjectInfo {
        let mut info = ObjectInfo::file(key, object.data.len() as i64).with_etag(&object.etag);
        info.last_modified = Some(object.last_modified);
        info
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        self.record(format!("list:{}", options.continuation_token.as_deref().unwrap_or("")));

        let objects = self.objects.lock().unwrap();
        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        for ((bucket, key), object) in objects.iter() {
            if bucket != &path.bucket || !key.starts_with(&path.key) {
                continue;
            }
            if !options.recursive {
                let rest = &key[path.key.len()..];
                if let Some(idx) = rest.find('/') {
                    let prefix = format!("{}{}", path.key, &rest[..=idx]);
                    if prefixes.insert(prefix.clone()) {
                        items.push(ObjectInfo::dir(prefix));
                    }
                    continue;
                }
            }
            items.push(Self::info(key, object));
        }

        let start: usize = options
            .continuation_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let truncated = end < items.len();
        Ok(ListResult {
            items: items[start.min(end)..end].to_vec(),
            truncated,
            continuation_token: truncated.then(|| end.to_string()),
        })
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&(path.bucket.clone(), path.key.clone()))
            .map(|o| Self::info(&path.key, o))
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn get_object(
        &self,
        path: &RemotePath,
        destination: &Path,
        progress: &ByteProgress,
    ) -> Result<ObjectInfo> {
        self.pause(&path.key).await;
        self.check_failures(&path.key)?;
        let object = self
            .objects
            .lock()
            .unwrap()
            .get(&(path.bucket.clone(), path.key.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let half = object.data.len() / 2;
        progress.advance(half as u64);
        tokio::task::yield_now().await;
        tokio::fs::write(destination, &object.data).await?;
        progress.advance((object.data.len() - half) as u64);
        self.record(format!("get:{}", path.key));
        Ok(Self::info(&path.key, &object))
    }

    async fn put_object(
        &self,
        path: &RemotePath,
        source: &Path,
        options: &PutOptions,
        progress: &ByteProgress,
    ) -> Result<ObjectInfo> {
        self.record(format!("put-start:{}", path.key));
        self.pause(&path.key).await;
        let data = tokio::fs::read(source).await?;
        let trickle = self.trickles.lock().unwrap().get(&path.key).copied();
        if let Some((steps, delay)) = trickle {
            let len = data.len() as u64;
            let step = len.div_ceil(u64::from(steps));
            let mut sent = 0;
            while sent < len {
                tokio::time::sleep(delay).await;
                let chunk = step.min(len - sent);
                progress.advance(chunk);
                sent += chunk;
            }
            self.check_failures(&path.key)?;
        } else {
            progress.advance((data.len() / 2) as u64);
            tokio::task::yield_now().await;
            self.check_failures(&path.key)?;
            progress.advance((data.len() - data.len() / 2) as u64);
        }

        let object = StoredObject {
            etag: hex::encode(Md5::digest(&data)),
            data,
            last_modified: jiff::Timestamp::now(),
            options: options.clone(),
        };
        let info = Self::info(&path.key, &object);
        self.objects
            .lock()
            .unwrap()
            .insert((path.bucket.clone(), path.key.clone()), object);
        self.record(format!("put-end:{}", path.key));
        Ok(info)
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        self.pause(&path.key).await;
        self.check_failures(&path.key)?;
        self.objects
            .lock()
            .unwrap()
            .remove(&(path.bucket.clone(), path.key.clone()));
        self.record(format!("delete:{}", path.key));
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for key in keys {
            if self.failing.lock().unwrap().contains(&key) {
                continue;
            }
            self.objects
                .lock()
                .unwrap()
                .remove(&(bucket.to_string(), key.clone()));
            self.record(format!("delete:{key}"));
            deleted.push(key);
        }
        Ok(deleted)
    }

    async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<ObjectInfo> {
        self.check_failures(&src.key)?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get(&(src.bucket.clone(), src.key.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        let info = Self::info(&dst.key, &object);
        objects.insert((dst.bucket.clone(), dst.key.clone()), object);
        drop(objects);
        self.record(format!("copy:{}", dst.key));
        Ok(info)
    }
}

//! In-process blob store.
//!
//! Holds blobs in a map and can be told to fail the next N downloads or
//! uploads, which is how the retry and failure scenarios are exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use docpipe_core::{BlobEntry, BlobStore, PipelineError, PipelineResult};

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), (Vec<u8>, u64)>>,
    version: AtomicU32,
    failing_downloads: AtomicU32,
    failing_uploads: AtomicU32,
    download_calls: AtomicU32,
    upload_calls: AtomicU32,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob without counting it as an upload call.
    pub async fn insert(&self, container: &str, name: &str, data: impl Into<Vec<u8>>) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.blobs
            .write()
            .await
            .insert((container.to_string(), name.to_string()), (data.into(), version));
    }

    pub async fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), name.to_string()))
            .map(|(data, _)| data.clone())
    }

    /// Drop a blob. Returns whether it existed.
    pub async fn remove(&self, container: &str, name: &str) -> bool {
        self.blobs
            .write()
            .await
            .remove(&(container.to_string(), name.to_string()))
            .is_some()
    }

    /// Names of every blob in `container`, sorted.
    pub async fn names(&self, container: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .blobs
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn fail_next_downloads(&self, n: u32) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_uploads(&self, n: u32) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    pub fn download_calls(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> u32 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn download(&self, container: &str, name: &str) -> PipelineResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_downloads) {
            return Err(PipelineError::Storage(format!(
                "injected download failure for {container}/{name}"
            )));
        }
        self.get(container, name)
            .await
            .ok_or_else(|| PipelineError::Storage(format!("blob not found: {container}/{name}")))
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>) -> PipelineResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_uploads) {
            return Err(PipelineError::Storage(format!(
                "injected upload failure for {container}/{name}"
            )));
        }
        self.insert(container, name, data).await;
        Ok(())
    }

    async fn list(&self, container: &str) -> PipelineResult<Vec<BlobEntry>> {
        let blobs = self.blobs.read().await;
        let mut entries: Vec<BlobEntry> = blobs
            .iter()
            .filter(|((c, _), _)| c == container)
            .map(|((_, name), (_, version))| BlobEntry {
                name: name.clone(),
                etag: format!("v{version}"),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryBlobStore::new();
        store.insert("input", "a.pdf", b"pdf".to_vec()).await;
        store.fail_next_downloads(2);

        assert!(store.download("input", "a.pdf").await.is_err());
        assert!(store.download("input", "a.pdf").await.is_err());
        assert_eq!(store.download("input", "a.pdf").await.unwrap(), b"pdf");
        assert_eq!(store.download_calls(), 3);
    }

    #[tokio::test]
    async fn test_rewrite_changes_etag() {
        let store = InMemoryBlobStore::new();
        store.insert("input", "a.pdf", b"v1".to_vec()).await;
        let first = store.list("input").await.unwrap();
        store.insert("input", "a.pdf", b"v2".to_vec()).await;
        let second = store.list("input").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_ne!(first[0].etag, second[0].etag);
        assert!(store.list("output").await.unwrap().is_empty());
    }
}

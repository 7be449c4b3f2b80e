//! Local filesystem backend: `<root>/<container>/<name>`.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use docpipe_core::{BlobEntry, BlobStore, PipelineResult};

use crate::error::{validate_blob_name, StorageError};

const PARTIAL_SUFFIX: &str = ".partial";

/// Directory-per-container blob store for development and single-host deployments.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StorageError> {
        validate_blob_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_blob_name(name)?;
        Ok(self.container_dir(container)?.join(name))
    }

    async fn read_blob(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(container, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a hidden sibling then rename, so readers never see a half-written blob.
    async fn write_blob(&self, container: &str, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(container, name)?;
        let dir = self.container_dir(container)?;
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(format!(".{name}{PARTIAL_SUFFIX}"));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list_dir(&self, container: &str) -> Result<Vec<BlobEntry>, StorageError> {
        let dir = self.container_dir(container)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            entries.push(BlobEntry {
                name,
                etag: format!("{modified:x}-{:x}", metadata.len()),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn download(&self, container: &str, name: &str) -> PipelineResult<Vec<u8>> {
        Ok(self.read_blob(container, name).await?)
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>) -> PipelineResult<()> {
        self.write_blob(container, name, &data).await?;
        info!(container = %container, name = %name, bytes = data.len(), "Wrote blob to disk");
        Ok(())
    }

    async fn list(&self, container: &str) -> PipelineResult<Vec<BlobEntry>> {
        Ok(self.list_dir(container).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpipe_core::PipelineError;

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .upload("output", "summary.txt", b"Invoice for $500".to_vec())
            .await
            .unwrap();
        let bytes = store.download("output", "summary.txt").await.unwrap();
        assert_eq!(bytes, b"Invoice for $500");
        assert!(dir.path().join("output").join("summary.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.download("input", "nope.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.download("input", "..").await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = store.upload("../escape", "a.txt", vec![]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_skips_partials_and_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.list("input").await.unwrap().is_empty());

        store.upload("input", "b.pdf", b"b".to_vec()).await.unwrap();
        store.upload("input", "a.pdf", b"a".to_vec()).await.unwrap();
        std::fs::write(dir.path().join("input").join(".c.pdf.partial"), b"c").unwrap();

        let names: Vec<String> = store
            .list("input")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.pdf".to_string(), "b.pdf".to_string()]);
    }
}

//! Storage gateway: read/write access to named blobs in the input and output containers.
//!
//! Every backend implements [`docpipe_core::BlobStore`]:
//! - [`AzureBlobStore`]: Azure Blob REST API, SharedKey or SAS authenticated
//! - [`FsBlobStore`]: one directory per container on the local disk
//! - [`InMemoryBlobStore`]: process-local map with failure injection for tests

pub mod azure;
pub mod connection;
pub mod error;
pub mod fs;
pub mod memory;

use std::sync::Arc;

use docpipe_core::BlobStore;

pub use azure::AzureBlobStore;
pub use connection::{Credential, StorageAccount};
pub use error::StorageError;
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;

/// Pick a backend: Azure when a connection string is configured, the local directory otherwise.
pub fn open_store(
    connection_string: Option<&str>,
    local_dir: &str,
) -> Result<Arc<dyn BlobStore>, StorageError> {
    match connection_string {
        Some(cs) => {
            let account = StorageAccount::parse(cs)?;
            tracing::info!(endpoint = %account.blob_endpoint, "Using Azure blob storage");
            Ok(Arc::new(AzureBlobStore::new(account)))
        }
        None => {
            tracing::info!(root = %local_dir, "Using local filesystem storage");
            Ok(Arc::new(FsBlobStore::new(local_dir)))
        }
    }
}

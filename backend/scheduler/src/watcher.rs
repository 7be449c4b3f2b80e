//! Upload trigger: polls the input container and reports blobs it has not seen.
//!
//! A blob is identified by `(name, etag)`, so a rewritten document triggers
//! again while an unchanged one does not. The sink is expected to be
//! idempotent for a given pair; the watcher keeps no durable state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use docpipe_core::{BlobStore, InputId, PipelineResult};

/// Receives newly observed uploads.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn on_upload(&self, input_id: InputId, etag: &str) -> PipelineResult<()>;
}

pub struct UploadWatcher {
    store: Arc<dyn BlobStore>,
    container: String,
    interval: Duration,
    sink: Arc<dyn UploadSink>,
    seen: Mutex<HashSet<(String, String)>>,
}

impl UploadWatcher {
    pub fn new(
        store: Arc<dyn BlobStore>,
        container: impl Into<String>,
        interval: Duration,
        sink: Arc<dyn UploadSink>,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            interval,
            sink,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// List the container once and hand every unseen blob to the sink.
    ///
    /// Returns how many blobs were handed off. A blob whose hand-off fails
    /// stays unseen and is offered again on the next poll. Keys for blobs no
    /// longer listed are forgotten, so the set stays bounded by the container.
    pub async fn poll_once(&self) -> PipelineResult<usize> {
        let entries = self.store.list(&self.container).await?;
        let mut seen = self.seen.lock().await;
        let listed: HashSet<(String, String)> = entries
            .iter()
            .map(|entry| (entry.name.clone(), entry.etag.clone()))
            .collect();
        seen.retain(|key| listed.contains(key));
        let mut started = 0;

        for entry in entries {
            let key = (entry.name.clone(), entry.etag.clone());
            if seen.contains(&key) {
                continue;
            }

            let input_id = match InputId::parse(&entry.name) {
                Ok(id) => id,
                Err(e) => {
                    warn!(blob = %entry.name, error = %e, "Ignoring blob with unusable name");
                    seen.insert(key);
                    continue;
                }
            };

            match self.sink.on_upload(input_id, &entry.etag).await {
                Ok(()) => {
                    seen.insert(key);
                    started += 1;
                }
                Err(e) => error!(blob = %entry.name, error = %e, "Failed to start workflow for upload"),
            }
        }
        Ok(started)
    }

    /// Poll forever at the configured interval.
    pub async fn run(self: Arc<Self>) {
        info!(
            container = %self.container,
            backend = %self.store.name(),
            interval_secs = self.interval.as_secs(),
            "Upload watcher started"
        );
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(0) => debug!("No new uploads"),
                Ok(n) => info!(count = n, "Started workflows for new uploads"),
                Err(e) => warn!(error = %e, "Listing input container failed"),
            }
        }
    }
}

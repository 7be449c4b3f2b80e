use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PipelineResult;

/// Read/write access to named blobs grouped in containers.
///
/// Implementations must tolerate concurrent reads and writes to distinct names.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for logs (e.g., "azure", "fs").
    fn name(&self) -> &str;

    /// Fetch the full body of `container/name`.
    async fn download(&self, container: &str, name: &str) -> PipelineResult<Vec<u8>>;

    /// Create or replace `container/name` with `data`.
    async fn upload(&self, container: &str, name: &str, data: Vec<u8>) -> PipelineResult<()>;

    /// List blobs currently in `container`.
    async fn list(&self, container: &str) -> PipelineResult<Vec<BlobEntry>>;
}

/// A listed blob. `etag` changes whenever the blob is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub etag: String,
}

/// OCR/layout-analysis provider.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Analyze raw document bytes and return recognized text in document order.
    async fn analyze(&self, document: &[u8], locale: &str) -> PipelineResult<AnalyzedDocument>;
}

/// Layout-analysis output: pages in order, each with its lines in reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedDocument {
    pub pages: Vec<AnalyzedPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedPage {
    pub lines: Vec<String>,
}

impl AnalyzedDocument {
    pub fn from_pages<P, L>(pages: P) -> Self
    where
        P: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        Self {
            pages: pages
                .into_iter()
                .map(|lines| AnalyzedPage {
                    lines: lines.into_iter().map(Into::into).collect(),
                })
                .collect(),
        }
    }

    /// Every line of every page, concatenated without separators.
    pub fn concatenated_text(&self) -> String {
        self.pages
            .iter()
            .flat_map(|page| page.lines.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Trait for language-model providers used by the summarization step.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "openai", "mock").
    fn name(&self) -> &str;

    /// Send a completion request and return the response text.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub latency_ms: u64,
}

/// Wall-clock source. Only steps read it; the orchestration body never does.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant, for tests and reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenates_pages_in_order() {
        let doc = AnalyzedDocument::from_pages(vec![
            vec!["Invoice", " #1"],
            vec![],
            vec!["Total: $500"],
        ]);
        assert_eq!(doc.concatenated_text(), "Invoice #1Total: $500");
    }

    #[test]
    fn test_empty_document_is_empty_text() {
        assert_eq!(AnalyzedDocument::default().concatenated_text(), "");
    }
}

//! Optical Character Recognition (OCR)
//!
//! Azure Document Intelligence `prebuilt-layout` client. Submits the raw
//! document, polls the long-running operation, and returns pages of lines.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use docpipe_core::{AnalyzedDocument, AnalyzedPage, DocumentAnalyzer, PipelineError, PipelineResult};

const PROVIDER: &str = "document-intelligence";
const MODEL_ID: &str = "prebuilt-layout";
const API_VERSION: &str = "2023-07-31";

/// How the long-running analyze operation is polled.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Total time to wait before reporting the analysis as timed out.
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Document Intelligence layout analyzer.
pub struct LayoutAnalyzer {
    client: Client,
    endpoint: String,
    api_key: String,
    poll: PollSettings,
}

impl LayoutAnalyzer {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/formrecognizer/documentModels/{MODEL_ID}:analyze?api-version={API_VERSION}",
            self.endpoint
        )
    }

    async fn submit(&self, document: &[u8], locale: &str) -> PipelineResult<String> {
        let response = self
            .client
            .post(self.analyze_url())
            .query(&[("locale", locale)])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| provider_error(format!("analyze request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::ACCEPTED && !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(format!("analyze returned {status}: {body}")));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| provider_error("analyze response had no Operation-Location header"))
    }

    async fn poll_result(&self, operation_url: &str) -> PipelineResult<AnalyzeResult> {
        let started = tokio::time::Instant::now();
        loop {
            let response = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| provider_error(format!("poll request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(provider_error(format!("poll returned {status}: {body}")));
            }

            let operation: AnalyzeOperation = response
                .json()
                .await
                .map_err(|e| provider_error(format!("unparsable analyze result: {e}")))?;

            match operation.status.as_str() {
                "succeeded" => {
                    return operation
                        .analyze_result
                        .ok_or_else(|| provider_error("succeeded without analyzeResult"))
                }
                "failed" | "canceled" => {
                    let detail = operation
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_default();
                    return Err(provider_error(format!(
                        "analysis {}: {detail}",
                        operation.status
                    )));
                }
                other => debug!(status = %other, "Layout analysis still running"),
            }

            if started.elapsed() >= self.poll.timeout {
                return Err(provider_error(format!(
                    "analysis timed out after {}s",
                    self.poll.timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll.interval).await;
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for LayoutAnalyzer {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze(&self, document: &[u8], locale: &str) -> PipelineResult<AnalyzedDocument> {
        info!(bytes = document.len(), locale = %locale, "Submitting document for layout analysis");
        let operation_url = self.submit(document, locale).await?;
        let result = self.poll_result(&operation_url).await?;
        let pages = result
            .pages
            .into_iter()
            .map(|page| AnalyzedPage {
                lines: page.lines.into_iter().map(|line| line.content).collect(),
            })
            .collect::<Vec<_>>();
        info!(pages = pages.len(), "Layout analysis complete");
        Ok(AnalyzedDocument { pages })
    }
}

fn provider_error(message: impl Into<String>) -> PipelineError {
    PipelineError::provider(PROVIDER, message)
}

#[derive(Deserialize)]
struct AnalyzeOperation {
    status: String,
    #[serde(rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResult>,
    error: Option<OperationError>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Deserialize)]
struct Line {
    content: String,
}

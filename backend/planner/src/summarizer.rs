use std::sync::Arc;

use tracing::{info, warn};

use docpipe_core::{LlmProvider, SummaryPayload};

use crate::prompts::summary_request;

/// Turns extracted text into a [`SummaryPayload`].
///
/// Provider failures are not propagated: they come back as a degraded payload
/// (`model == "error"`, zero usage) whose content describes the failure, so a
/// flaky model never blocks publishing.
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn summarize(&self, text: &str) -> SummaryPayload {
        let request = summary_request(&self.model, text);
        match self.provider.complete(&request).await {
            Ok(response) => {
                info!(
                    provider = %response.provider,
                    model = %response.model,
                    tokens = response.tokens_used,
                    latency_ms = response.latency_ms,
                    "Summary generated"
                );
                SummaryPayload::new(response.content, response.model, response.tokens_used)
            }
            Err(e) => {
                warn!(provider = %self.provider.name(), error = %e, "Summarization failed, publishing degraded summary");
                SummaryPayload::degraded(format!("{e:#}"))
            }
        }
    }
}

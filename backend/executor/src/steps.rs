//! The three pipeline steps. Each is a function of its input plus the
//! collaborators it was built with; none of them touches workflow state.

use std::sync::Arc;

use tracing::info;

use docpipe_core::{
    BlobStore, Clock, DocumentAnalyzer, InputId, OutputReference, PipelineResult, SummaryPayload,
};
use docpipe_planner::Summarizer;

use crate::naming::output_name;

/// Download the input document and return its recognized text.
pub struct ExtractStep {
    store: Arc<dyn BlobStore>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    container: String,
    locale: String,
}

impl ExtractStep {
    pub fn new(
        store: Arc<dyn BlobStore>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        container: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            store,
            analyzer,
            container: container.into(),
            locale: locale.into(),
        }
    }

    pub async fn run(&self, input_id: &InputId) -> PipelineResult<String> {
        info!(input_id = %input_id, analyzer = %self.analyzer.name(), "In extract step");
        let document = self.store.download(&self.container, input_id.as_str()).await?;
        let analyzed = self.analyzer.analyze(&document, &self.locale).await?;
        let text = analyzed.concatenated_text();
        info!(input_id = %input_id, pages = analyzed.pages.len(), chars = text.len(), "Text extracted");
        Ok(text)
    }
}

/// Summarize extracted text. Never fails: provider errors become a degraded payload.
pub struct SummarizeStep {
    summarizer: Summarizer,
}

impl SummarizeStep {
    pub fn new(summarizer: Summarizer) -> Self {
        Self { summarizer }
    }

    pub async fn run(&self, text: &str) -> PipelineResult<SummaryPayload> {
        info!(model = %self.summarizer.model(), chars = text.len(), "In summarize step");
        Ok(self.summarizer.summarize(text).await)
    }
}

/// Write the summary content to the output container under a derived name.
pub struct PublishStep {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    container: String,
}

impl PublishStep {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, container: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            container: container.into(),
        }
    }

    pub async fn run(&self, input_id: &InputId, summary: &SummaryPayload) -> PipelineResult<OutputReference> {
        let name = output_name(input_id, self.clock.now());
        info!(input_id = %input_id, output = %name, degraded = summary.is_degraded(), "In publish step");
        self.store
            .upload(&self.container, &name, summary.content.as_bytes().to_vec())
            .await?;
        Ok(OutputReference::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docpipe_core::{AnalyzedDocument, FixedClock, PipelineError};
    use docpipe_planner::MockProvider;
    use docpipe_storage::InMemoryBlobStore;
    use docpipe_understanding::ScriptedAnalyzer;

    #[tokio::test]
    async fn extract_concatenates_pages() {
        let store = Arc::new(InMemoryBlobStore::new());
        store.insert("input", "invoice123.pdf", b"%PDF".to_vec()).await;
        let analyzer = Arc::new(ScriptedAnalyzer::returning(AnalyzedDocument::from_pages(vec![
            vec!["Total: ", "$500"],
            vec![" due"],
        ])));
        let step = ExtractStep::new(store, analyzer, "input", "en-US");

        let text = step.run(&InputId::parse("invoice123.pdf").unwrap()).await.unwrap();
        assert_eq!(text, "Total: $500 due");
    }

    #[tokio::test]
    async fn extract_missing_blob_is_storage_error() {
        let store = Arc::new(InMemoryBlobStore::new());
        let step = ExtractStep::new(store, Arc::new(ScriptedAnalyzer::echo()), "input", "en-US");
        let err = step.run(&InputId::parse("nope.pdf").unwrap()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[tokio::test]
    async fn summarize_degrades_on_provider_error() {
        let provider = Arc::new(MockProvider::new("mock").failing_first(1));
        let step = SummarizeStep::new(Summarizer::new(provider, "gpt-3.5-turbo"));
        let summary = step.run("Total: $500").await.unwrap();
        assert_eq!(summary.model, "error");
        assert_eq!(summary.usage, 0);
    }

    #[tokio::test]
    async fn publish_writes_content_under_derived_name() {
        let store = Arc::new(InMemoryBlobStore::new());
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let step = PublishStep::new(store.clone(), clock, "output");

        let output = step
            .run(
                &InputId::parse("invoice123.pdf").unwrap(),
                &SummaryPayload::new("Invoice for $500", "gpt-3.5-turbo", 42),
            )
            .await
            .unwrap();
        assert_eq!(output.as_str(), "invoice123.pdf-2024-01-01T00-00-00.txt");
        assert_eq!(
            store.get("output", output.as_str()).await.unwrap(),
            b"Invoice for $500"
        );
    }
}

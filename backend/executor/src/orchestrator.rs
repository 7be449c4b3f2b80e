use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use docpipe_core::{
    Clock, InstanceId, OutputReference, PipelineError, PipelineResult, StepKind, StepRecord,
    SummaryPayload, WorkflowInstance,
};
use docpipe_scheduler::{retry, RetryPolicy};
use docpipe_supervisor::HistoryStore;

use crate::steps::{ExtractStep, PublishStep, SummarizeStep};

/// Sequences extract, summarize and publish for one instance.
///
/// Every step outcome is written to the history store. Running an instance
/// that already has completed steps replays their recorded outputs instead of
/// calling the steps again, so a resumed instance picks up at the first step
/// without a completed record.
pub struct Orchestrator {
    history: Arc<HistoryStore>,
    extract: ExtractStep,
    summarize: SummarizeStep,
    publish: PublishStep,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        history: Arc<HistoryStore>,
        extract: ExtractStep,
        summarize: SummarizeStep,
        publish: PublishStep,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            history,
            extract,
            summarize,
            publish,
            policy,
            clock,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Drive `instance` to a terminal state and return the published reference.
    ///
    /// A step that exhausts its retry policy marks the instance failed and
    /// surfaces as [`PipelineError::StepFailed`]; nothing is published.
    pub async fn run(&self, instance: &WorkflowInstance) -> PipelineResult<OutputReference> {
        info!(
            instance_id = %instance.id,
            input_id = %instance.input_id,
            resume_from = instance.current_step,
            "Starting orchestration"
        );

        match self.run_steps(instance).await {
            Ok(output) => {
                self.history
                    .complete_instance(&instance.id, &output, self.clock.now())?;
                info!(instance_id = %instance.id, "Successfully uploaded summary to {output}");
                Ok(output)
            }
            Err(err @ PipelineError::StepFailed { .. }) => {
                error!(instance_id = %instance.id, error = %err, "Orchestration failed");
                self.history
                    .fail_instance(&instance.id, &err.to_string(), self.clock.now())?;
                Err(err)
            }
            // History failures leave the instance running so it can be resumed.
            Err(err) => Err(err),
        }
    }

    async fn run_steps(&self, instance: &WorkflowInstance) -> PipelineResult<OutputReference> {
        let input_id = &instance.input_id;

        let text: String = self
            .run_step(
                instance.id,
                StepKind::Extract,
                json!({ "input_id": input_id }),
                || self.extract.run(input_id),
            )
            .await?;

        let summary: SummaryPayload = self
            .run_step(
                instance.id,
                StepKind::Summarize,
                json!({ "text": text }),
                || self.summarize.run(&text),
            )
            .await?;

        self.run_step(
            instance.id,
            StepKind::Publish,
            json!({ "input_id": input_id, "summary": summary }),
            || self.publish.run(input_id, &summary),
        )
        .await
    }

    /// Replay `step` from history when it already completed; otherwise call it
    /// under the retry policy and record the outcome.
    async fn run_step<T, F, Fut>(
        &self,
        instance_id: InstanceId,
        step: StepKind,
        input: serde_json::Value,
        op: F,
    ) -> PipelineResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        if let Some(record) = self.history.completed_step(&instance_id, step)? {
            debug!(instance_id = %instance_id, step = %step, "Replaying completed step from history");
            let output = record.output.ok_or_else(|| {
                PipelineError::History(format!("completed {step} record has no output"))
            })?;
            return Ok(serde_json::from_value(output)?);
        }

        match retry(&self.policy, step.as_str(), op).await {
            Ok((value, attempts)) => {
                let output = serde_json::to_value(&value)?;
                self.history
                    .record_step(&StepRecord::completed(instance_id, step, input, output, attempts))?;
                Ok(value)
            }
            Err(exhausted) => {
                let last_error = exhausted.error.to_string();
                self.history.record_step(&StepRecord::failed(
                    instance_id,
                    step,
                    input,
                    exhausted.attempts,
                    last_error.clone(),
                ))?;
                Err(PipelineError::StepFailed {
                    step,
                    attempts: exhausted.attempts,
                    last_error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use docpipe_core::{
        AnalyzedDocument, BlobStore, DocumentAnalyzer, FixedClock, InputId, InstanceStatus,
        LlmProvider, StepStatus,
    };
    use docpipe_planner::{MockProvider, Summarizer};
    use docpipe_storage::InMemoryBlobStore;
    use docpipe_understanding::ScriptedAnalyzer;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryBlobStore>,
        analyzer: Arc<ScriptedAnalyzer>,
        provider: Arc<MockProvider>,
        history: Arc<HistoryStore>,
        orchestrator: Orchestrator,
    }

    fn fixture(analyzer: ScriptedAnalyzer, provider: MockProvider) -> Fixture {
        let store = Arc::new(InMemoryBlobStore::new());
        let analyzer = Arc::new(analyzer);
        let provider = Arc::new(provider);
        let history = Arc::new(HistoryStore::in_memory().unwrap());
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));

        let blobs: Arc<dyn BlobStore> = store.clone();
        let ocr: Arc<dyn DocumentAnalyzer> = analyzer.clone();
        let llm: Arc<dyn LlmProvider> = provider.clone();
        let orchestrator = Orchestrator::new(
            history.clone(),
            ExtractStep::new(blobs.clone(), ocr, "input", "en-US"),
            SummarizeStep::new(Summarizer::new(llm, "gpt-3.5-turbo")),
            PublishStep::new(blobs, clock.clone(), "output"),
            RetryPolicy::fixed(3, Duration::from_millis(5_000)),
            clock,
        );
        Fixture {
            store,
            analyzer,
            provider,
            history,
            orchestrator,
        }
    }

    fn invoice_provider() -> MockProvider {
        MockProvider::new("mock")
            .with_response("Invoice for $500")
            .with_model("gpt-3.5-turbo")
            .with_tokens(42)
    }

    fn invoice_analyzer() -> ScriptedAnalyzer {
        ScriptedAnalyzer::returning(AnalyzedDocument::from_pages(vec![vec!["Total: $500"]]))
    }

    async fn start(f: &Fixture, input: &str) -> WorkflowInstance {
        f.store.insert("input", input, b"%PDF-1.7".to_vec()).await;
        let instance = WorkflowInstance::new(
            Uuid::new_v4(),
            InputId::parse(input).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        f.history.create_instance(&instance).unwrap();
        instance
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoice_end_to_end() {
        let f = fixture(invoice_analyzer(), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;

        let output = f.orchestrator.run(&instance).await.unwrap();

        assert_eq!(output.as_str(), "invoice123.pdf-2024-01-01T00-00-00.txt");
        assert_eq!(f.store.names("output").await, vec![output.as_str().to_string()]);
        assert_eq!(f.store.get("output", output.as_str()).await.unwrap(), b"Invoice for $500");
        assert!(f.provider.last_prompt().unwrap().ends_with("Total: $500"));

        let stored = f.history.get_instance(&instance.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Completed);
        assert_eq!(stored.current_step, 3);
        assert_eq!(stored.output_ref, Some(output));
        assert_eq!(f.history.step_history(&instance.id).unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_extract_failure_is_retried() {
        let f = fixture(invoice_analyzer().failing_first(2), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;

        f.orchestrator.run(&instance).await.unwrap();

        assert_eq!(f.analyzer.calls(), 3);
        let extract = f
            .history
            .completed_step(&instance.id, StepKind::Extract)
            .unwrap()
            .unwrap();
        assert_eq!(extract.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_extract_fails_without_output() {
        let f = fixture(invoice_analyzer().failing_first(3), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;

        let err = f.orchestrator.run(&instance).await.unwrap_err();

        match err {
            PipelineError::StepFailed { step, attempts, .. } => {
                assert_eq!(step, StepKind::Extract);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.analyzer.calls(), 3);
        assert_eq!(f.provider.calls(), 0);
        assert!(f.store.names("output").await.is_empty());

        let stored = f.history.get_instance(&instance.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Failed);
        assert!(stored.output_ref.is_none());
        assert!(stored.error.unwrap().contains("extract"));
        let steps = f.history.step_history(&instance.id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summarization_failure_still_publishes() {
        let f = fixture(invoice_analyzer(), invoice_provider().failing_first(1));
        let instance = start(&f, "invoice123.pdf").await;

        let output = f.orchestrator.run(&instance).await.unwrap();

        let body = String::from_utf8(f.store.get("output", output.as_str()).await.unwrap()).unwrap();
        assert!(body.starts_with("Error generating summary: "), "{body}");
        // The degraded payload is a success, so the provider is not retried.
        assert_eq!(f.provider.calls(), 1);
        let summary = f
            .history
            .completed_step(&instance.id, StepKind::Summarize)
            .unwrap()
            .unwrap();
        assert_eq!(summary.output.unwrap()["model"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_is_retried_then_fatal() {
        let f = fixture(invoice_analyzer(), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;
        f.store.fail_next_uploads(3);

        let err = f.orchestrator.run(&instance).await.unwrap_err();
        assert!(matches!(err, PipelineError::StepFailed { step: StepKind::Publish, attempts: 3, .. }));
        assert_eq!(f.store.upload_calls(), 3);
        assert!(f.store.names("output").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_skips_completed_steps() {
        let f = fixture(invoice_analyzer(), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;

        // Simulate a crash after extract and summarize completed.
        f.history
            .record_step(&StepRecord::completed(
                instance.id,
                StepKind::Extract,
                json!({ "input_id": "invoice123.pdf" }),
                json!("Total: $500"),
                1,
            ))
            .unwrap();
        f.history
            .record_step(&StepRecord::completed(
                instance.id,
                StepKind::Summarize,
                json!({ "text": "Total: $500" }),
                serde_json::to_value(SummaryPayload::new("Recorded summary", "gpt-3.5-turbo", 7))
                    .unwrap(),
                1,
            ))
            .unwrap();
        let resumed = f.history.get_instance(&instance.id).unwrap().unwrap();
        assert_eq!(resumed.current_step, 2);

        let output = f.orchestrator.run(&resumed).await.unwrap();

        assert_eq!(f.analyzer.calls(), 0);
        assert_eq!(f.provider.calls(), 0);
        assert_eq!(f.store.download_calls(), 0);
        assert_eq!(f.store.get("output", output.as_str()).await.unwrap(), b"Recorded summary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_twice_publishes_once() {
        let f = fixture(invoice_analyzer(), invoice_provider());
        let instance = start(&f, "invoice123.pdf").await;

        let first = f.orchestrator.run(&instance).await.unwrap();
        let second = f.orchestrator.run(&instance).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.upload_calls(), 1);
        assert_eq!(f.analyzer.calls(), 1);
    }
}

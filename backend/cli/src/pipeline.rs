//! Wire the workflow runtime together from a [`PipelineConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use docpipe_config::PipelineConfig;
use docpipe_core::{BlobStore, Clock, DocumentAnalyzer, LlmProvider, SystemClock};
use docpipe_executor::{ExtractStep, Orchestrator, PublishStep, SummarizeStep, WorkflowRuntime};
use docpipe_planner::{OpenAiProvider, Summarizer};
use docpipe_scheduler::RetryPolicy;
use docpipe_storage::open_store;
use docpipe_supervisor::HistoryStore;
use docpipe_understanding::LayoutAnalyzer;

/// Everything `run` and `serve` need, sharing one store and one history.
pub struct Pipeline {
    pub store: Arc<dyn BlobStore>,
    pub history: Arc<HistoryStore>,
    pub runtime: Arc<WorkflowRuntime>,
}

/// Open only the history database, for read-only commands.
pub fn open_history(config: &PipelineConfig) -> Result<Arc<HistoryStore>> {
    let history = HistoryStore::open(&config.db_path)
        .with_context(|| format!("Failed to open history database at {}", config.db_path))?;
    Ok(Arc::new(history))
}

pub fn build(config: &PipelineConfig) -> Result<Pipeline> {
    let analyzer = analyzer(config)?;
    let store = open_store(
        config.storage.connection_string.as_deref(),
        &config.storage.local_dir,
    )
    .context("Failed to open blob storage")?;
    let history = open_history(config)?;
    let provider = provider(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let orchestrator = Orchestrator::new(
        history.clone(),
        ExtractStep::new(
            store.clone(),
            analyzer,
            config.storage.input_container.clone(),
            config.ocr.locale.clone(),
        ),
        SummarizeStep::new(Summarizer::new(provider, config.llm.model.clone())),
        PublishStep::new(
            store.clone(),
            clock.clone(),
            config.storage.output_container.clone(),
        ),
        RetryPolicy::from(&config.retry),
        clock.clone(),
    );
    let runtime = WorkflowRuntime::new(
        Arc::new(orchestrator),
        clock,
        config.storage.input_container.clone(),
    );

    info!(
        input = %config.storage.input_container,
        output = %config.storage.output_container,
        model = %config.llm.model,
        max_attempts = config.retry.max_attempts,
        "Pipeline ready"
    );

    Ok(Pipeline {
        store,
        history,
        runtime: Arc::new(runtime),
    })
}

fn analyzer(config: &PipelineConfig) -> Result<Arc<dyn DocumentAnalyzer>> {
    let endpoint = config
        .ocr
        .endpoint
        .as_deref()
        .context("COGNITIVE_SERVICES_ENDPOINT is not set")?;
    let key = config
        .ocr
        .api_key
        .as_deref()
        .context("COGNITIVE_SERVICES_KEY is not set")?;
    Ok(Arc::new(LayoutAnalyzer::new(endpoint, key)))
}

// A missing key still builds a provider; its calls fail and summaries degrade.
fn provider(config: &PipelineConfig) -> Arc<dyn LlmProvider> {
    let key = config.llm.api_key.clone().unwrap_or_default();
    Arc::new(OpenAiProvider::new(key).with_base_url(config.llm.base_url.clone()))
}

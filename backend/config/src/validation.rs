//! Config validation: checks with user-friendly error messages.

use crate::schema::PipelineConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &PipelineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_retry(config, &mut report);
    validate_storage(config, &mut report);
    validate_providers(config, &mut report);
    validate_server(config, &mut report);
    report
}

fn validate_retry(config: &PipelineConfig, report: &mut ValidationReport) {
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        report.error("retry.max_attempts", "Must allow at least one attempt");
    }
    if !retry.backoff_coefficient.is_finite() || retry.backoff_coefficient < 1.0 {
        report.error(
            "retry.backoff_coefficient",
            "Backoff coefficient must be a finite number >= 1.0",
        );
    }
    if retry.max_retry_interval_ms < retry.first_retry_interval_ms {
        report.warn(
            "retry.max_retry_interval_ms",
            "Delay cap is below the first retry interval; every retry will use the cap",
        );
    }
}

fn validate_storage(config: &PipelineConfig, report: &mut ValidationReport) {
    let storage = &config.storage;
    for (path, name) in [
        ("storage.input_container", &storage.input_container),
        ("storage.output_container", &storage.output_container),
    ] {
        if name.contains('/') {
            report.error(path, "Container name cannot contain '/'");
        }
    }
    if storage.input_container == storage.output_container {
        report.error(
            "storage.output_container",
            "Output container must differ from the input container; summaries would re-trigger the pipeline",
        );
    }
    if storage.connection_string.is_none() {
        report.warn(
            "storage.connection_string",
            format!("No connection string; using local directory '{}'", storage.local_dir),
        );
    }
}

fn validate_providers(config: &PipelineConfig, report: &mut ValidationReport) {
    if config.ocr.endpoint.is_none() || config.ocr.api_key.is_none() {
        report.warn(
            "ocr",
            "Document Intelligence endpoint or key missing; `run` and `serve` will refuse to start",
        );
    }
    if let Some(endpoint) = &config.ocr.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            report.error("ocr.endpoint", "Endpoint must be an http(s) URL");
        }
    }
    if config.llm.api_key.is_none() {
        report.warn(
            "llm.api_key",
            "No summarization API key; every summary will degrade to an error message",
        );
    }
    if config.llm.model.trim().is_empty() {
        report.error("llm.model", "Model name cannot be empty");
    }
}

fn validate_server(config: &PipelineConfig, report: &mut ValidationReport) {
    if config.server.poll_interval_secs == 0 {
        report.error("server.poll_interval_secs", "Poll interval must be at least 1 second");
    }
}

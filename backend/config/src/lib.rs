//! `docpipe-config`: runtime configuration for the document pipeline.
//!
//! Provides:
//! - Typed config schema (storage, OCR, summarization, retry, server)
//! - Loading from environment variables with defaults
//! - Validation with errors and warnings
//! - Redaction for safe logging/display

pub mod defaults;
pub mod env;
pub mod redact;
pub mod schema;
pub mod validation;

pub use env::{from_env, from_vars, ConfigError};
pub use redact::{collect_redacted_paths, redact};
pub use schema::{LlmConfig, OcrConfig, PipelineConfig, RetryConfig, ServerConfig, StorageConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};

/// Load config from the process environment, validate it, and log the report.
///
/// Fails when the environment holds unparsable values or validation reports errors.
pub fn load() -> Result<PipelineConfig> {
    let config = from_env().context("Failed to read configuration from environment")?;
    check(&config)?;
    Ok(config)
}

/// Log every validation finding for `config` and fail if any is an error.
pub fn check(config: &PipelineConfig) -> Result<()> {
    let report = validate(config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        anyhow::bail!("configuration has {} error(s)", report.errors.len());
    }
    Ok(())
}

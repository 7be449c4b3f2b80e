use thiserror::Error;

use crate::types::StepKind;

/// Top-level error type for the docpipe workflow engine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("step '{step}' failed after {attempts} attempt(s): {last_error}")]
    StepFailed {
        step: StepKind,
        attempts: u32,
        last_error: String,
    },

    #[error("history store error: {0}")]
    History(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the retry wrapper may attempt the failed call again.
    ///
    /// Transport-level failures are transient; bad input and exhausted steps are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Storage(_) | PipelineError::Provider { .. } => true,
            PipelineError::Other(_) => true,
            PipelineError::Validation(_)
            | PipelineError::StepFailed { .. }
            | PipelineError::History(_)
            | PipelineError::Config(_) => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::History(format!("step payload (de)serialization failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::Storage("timeout".into()).is_retryable());
        assert!(PipelineError::provider("ocr", "503").is_retryable());
        assert!(!PipelineError::Validation("empty id".into()).is_retryable());
        assert!(!PipelineError::StepFailed {
            step: StepKind::Extract,
            attempts: 3,
            last_error: "boom".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_step_failed_display() {
        let err = PipelineError::StepFailed {
            step: StepKind::Publish,
            attempts: 3,
            last_error: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "step 'publish' failed after 3 attempt(s): connection reset"
        );
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Unique identity of one workflow instance.
pub type InstanceId = Uuid;

/// Model identifier carried by a summary that degraded into an error message.
pub const ERROR_MODEL_SENTINEL: &str = "error";

const MAX_INPUT_ID_LEN: usize = 1024;

/// Handle to a source document in the input container.
///
/// Always a bare blob name: no path separators, no relative segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputId(String);

impl InputId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PipelineError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(PipelineError::Validation("input identifier is empty".into()));
        }
        if raw.len() > MAX_INPUT_ID_LEN {
            return Err(PipelineError::Validation(format!(
                "input identifier exceeds {MAX_INPUT_ID_LEN} bytes"
            )));
        }
        if raw == "." || raw == ".." {
            return Err(PipelineError::Validation(format!(
                "input identifier '{raw}' is a relative path segment"
            )));
        }
        if raw.contains('/') || raw.contains('\\') {
            return Err(PipelineError::Validation(format!(
                "input identifier '{raw}' contains a path separator"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(PipelineError::Validation(
                "input identifier contains control characters".into(),
            ));
        }
        Ok(Self(raw))
    }

    /// Build an identifier from a trigger path such as `input/report.pdf`,
    /// dropping the leading container segment.
    pub fn from_blob_path(path: &str) -> Result<Self, PipelineError> {
        let name = match path.split_once('/') {
            Some((_, rest)) => rest,
            None => path,
        };
        Self::parse(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InputId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<InputId> for String {
    fn from(id: InputId) -> Self {
        id.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three steps of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Extract,
    Summarize,
    Publish,
}

impl StepKind {
    pub const ALL: [StepKind; 3] = [StepKind::Extract, StepKind::Summarize, StepKind::Publish];

    pub fn index(self) -> u32 {
        match self {
            StepKind::Extract => 0,
            StepKind::Summarize => 1,
            StepKind::Publish => 2,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Extract => "extract",
            StepKind::Summarize => "summarize",
            StepKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown instance status '{other}'"
            ))),
        }
    }
}

/// One end-to-end run of the pipeline for one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub input_id: InputId,
    /// Index of the next step to execute; equals 3 once every step completed.
    pub current_step: u32,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub output_ref: Option<OutputReference>,
    pub error: Option<String>,
}

impl WorkflowInstance {
    pub fn new(id: InstanceId, input_id: InputId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            input_id,
            current_step: 0,
            status: InstanceStatus::Running,
            created_at,
            updated_at: created_at,
            output_ref: None,
            error: None,
        }
    }
}

/// Result of the summarization step.
///
/// A provider failure is carried as a value: `model == ERROR_MODEL_SENTINEL`,
/// `usage == 0` and the diagnostic message in `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub content: String,
    pub model: String,
    pub usage: u64,
}

impl SummaryPayload {
    pub fn new(content: impl Into<String>, model: impl Into<String>, usage: u64) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage,
        }
    }

    pub fn degraded(message: impl fmt::Display) -> Self {
        Self {
            content: format!("Error generating summary: {message}"),
            model: ERROR_MODEL_SENTINEL.to_string(),
            usage: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.model == ERROR_MODEL_SENTINEL
    }
}

/// Name of the published summary blob in the output container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputReference(String);

impl OutputReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_id_accepts_plain_names() {
        let id = InputId::parse("invoice123.pdf").unwrap();
        assert_eq!(id.as_str(), "invoice123.pdf");
    }

    #[test]
    fn test_input_id_rejects_malformed() {
        for bad in ["", ".", "..", "a/b.pdf", "a\\b.pdf", "bad\nname.pdf"] {
            assert!(
                matches!(InputId::parse(bad), Err(PipelineError::Validation(_))),
                "expected rejection of {bad:?}"
            );
        }
        assert!(InputId::parse("x".repeat(2000)).is_err());
    }

    #[test]
    fn test_input_id_strips_container_segment() {
        let id = InputId::from_blob_path("input/report.pdf").unwrap();
        assert_eq!(id.as_str(), "report.pdf");
        assert_eq!(InputId::from_blob_path("report.pdf").unwrap().as_str(), "report.pdf");
        assert!(InputId::from_blob_path("input/nested/report.pdf").is_err());
    }

    #[test]
    fn test_input_id_serde_validates() {
        let ok: InputId = serde_json::from_str("\"a.pdf\"").unwrap();
        assert_eq!(ok.as_str(), "a.pdf");
        assert!(serde_json::from_str::<InputId>("\"../etc\"").is_err());
    }

    #[test]
    fn test_step_kind_order() {
        assert_eq!(StepKind::from_index(0), Some(StepKind::Extract));
        assert_eq!(StepKind::from_index(2), Some(StepKind::Publish));
        assert_eq!(StepKind::from_index(3), None);
        assert_eq!(StepKind::Summarize.to_string(), "summarize");
    }

    #[test]
    fn test_status_round_trip_text() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("paused".parse::<InstanceStatus>().is_err());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_degraded_summary() {
        let payload = SummaryPayload::degraded("rate limited");
        assert_eq!(payload.content, "Error generating summary: rate limited");
        assert_eq!(payload.model, ERROR_MODEL_SENTINEL);
        assert_eq!(payload.usage, 0);
        assert!(payload.is_degraded());
        assert!(!SummaryPayload::new("ok", "gpt-3.5-turbo", 42).is_degraded());
    }
}

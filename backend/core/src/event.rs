use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{InstanceId, StepKind};

/// An immutable entry in an instance's step history.
/// Replay reads these back instead of calling the step again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub instance_id: InstanceId,
    pub step_index: u32,
    pub step: StepKind,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a recorded step invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step produced an output; replay short-circuits to it
    Completed,
    /// The step exhausted its retry policy
    Failed,
}

impl StepRecord {
    pub fn completed(
        instance_id: InstanceId,
        step: StepKind,
        input: serde_json::Value,
        output: serde_json::Value,
        attempts: u32,
    ) -> Self {
        Self {
            instance_id,
            step_index: step.index(),
            step,
            input,
            output: Some(output),
            status: StepStatus::Completed,
            attempts,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        instance_id: InstanceId,
        step: StepKind,
        input: serde_json::Value,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            step_index: step.index(),
            step,
            input,
            output: None,
            status: StepStatus::Failed,
            attempts,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StepStatus {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_completed_record() {
        let id = Uuid::new_v4();
        let record = StepRecord::completed(
            id,
            StepKind::Summarize,
            serde_json::json!("Total: $500"),
            serde_json::json!({"content": "Invoice for $500"}),
            2,
        );
        assert_eq!(record.instance_id, id);
        assert_eq!(record.step_index, 1);
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.attempts, 2);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failed_record_has_no_output() {
        let record = StepRecord::failed(
            Uuid::new_v4(),
            StepKind::Extract,
            serde_json::json!("a.pdf"),
            3,
            "timed out",
        );
        assert!(record.output.is_none());
        assert_eq!(record.error.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_step_status_text() {
        assert_eq!(StepStatus::Completed.to_string(), "completed");
        assert_eq!("failed".parse::<StepStatus>().unwrap(), StepStatus::Failed);
    }
}

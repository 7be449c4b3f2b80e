pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use error::{PipelineError, PipelineResult};
pub use event::{StepRecord, StepStatus};
pub use traits::{
    AnalyzedDocument, AnalyzedPage, BlobEntry, BlobStore, Clock, DocumentAnalyzer, FixedClock,
    LlmProvider, LlmRequest, LlmResponse, SystemClock,
};
pub use types::{
    InputId, InstanceId, InstanceStatus, OutputReference, StepKind, SummaryPayload,
    WorkflowInstance, ERROR_MODEL_SENTINEL,
};

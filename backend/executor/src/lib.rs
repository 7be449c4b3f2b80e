pub mod naming;
pub mod orchestrator;
pub mod runtime;
pub mod steps;

pub use naming::output_name;
pub use orchestrator::Orchestrator;
pub use runtime::{StartOutcome, WorkflowRuntime};
pub use steps::{ExtractStep, PublishStep, SummarizeStep};

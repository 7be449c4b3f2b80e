pub mod prompts;
pub mod providers;
pub mod summarizer;

pub use providers::mock::MockProvider;
pub use providers::openai::OpenAiProvider;
pub use summarizer::Summarizer;

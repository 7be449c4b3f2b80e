pub mod mock;
pub mod ocr;

pub use mock::ScriptedAnalyzer;
pub use ocr::{LayoutAnalyzer, PollSettings};

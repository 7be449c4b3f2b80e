pub mod retry;
pub mod watcher;

pub use retry::{retry, RetryExhausted, RetryPolicy, RetryState};
pub use watcher::{UploadSink, UploadWatcher};

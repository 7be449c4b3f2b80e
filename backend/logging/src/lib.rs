//! Structured logging for docpipe.
//!
//! Handles console and rolling NDJSON output, and redaction of storage and provider secrets.

pub mod logger;
pub mod redact;

pub use logger::init_logger;
pub use redact::redact_sensitive_data;

//! Default values for every configurable setting.

pub const DEFAULT_INPUT_CONTAINER: &str = "input";
pub const DEFAULT_OUTPUT_CONTAINER: &str = "output";
pub const DEFAULT_STORAGE_DIR: &str = "./storage";

pub const DEFAULT_OCR_LOCALE: &str = "en-US";

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// First-retry delay applied to every step invocation.
pub const DEFAULT_FIRST_RETRY_INTERVAL_MS: u64 = 5_000;
/// Attempts per step, counting the first call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 1.0 keeps the delay fixed between attempts.
pub const DEFAULT_BACKOFF_COEFFICIENT: f64 = 1.0;
pub const DEFAULT_MAX_RETRY_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_DB_PATH: &str = "docpipe.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7071;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_LEVEL: &str = "info";

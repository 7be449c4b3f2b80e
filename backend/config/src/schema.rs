//! docpipe runtime configuration schema.

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Root configuration for the pipeline runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    /// SQLite history database path
    pub db_path: String,
    /// Rolling log directory
    pub log_dir: String,
    pub log_level: String,
}

/// Where input documents come from and summaries go to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Azure storage connection string; `None` selects the local directory backend
    pub connection_string: Option<String>,
    pub local_dir: String,
    pub input_container: String,
    pub output_container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            local_dir: DEFAULT_STORAGE_DIR.to_string(),
            input_container: DEFAULT_INPUT_CONTAINER.to_string(),
            output_container: DEFAULT_OUTPUT_CONTAINER.to_string(),
        }
    }
}

/// Document Intelligence (layout analysis) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub locale: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            locale: DEFAULT_OCR_LOCALE.to_string(),
        }
    }
}

/// Chat-completions settings for the summarization step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }
}

/// Retry policy applied uniformly to step invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub first_retry_interval_ms: u64,
    pub max_attempts: u32,
    pub backoff_coefficient: f64,
    pub max_retry_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            first_retry_interval_ms: DEFAULT_FIRST_RETRY_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            max_retry_interval_ms: DEFAULT_MAX_RETRY_INTERVAL_MS,
        }
    }
}

/// HTTP API and upload watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub poll_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
            db_path: DEFAULT_DB_PATH.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl PipelineConfig {
    /// A display-safe JSON rendering with secrets masked.
    pub fn redacted(&self) -> serde_json::Value {
        crate::redact::redact(&serde_json::to_value(self).unwrap_or_default())
    }

    /// Dotted paths of the fields [`redacted`](Self::redacted) masks.
    pub fn masked_fields(&self) -> Vec<String> {
        crate::redact::collect_redacted_paths(&serde_json::to_value(self).unwrap_or_default())
    }
}

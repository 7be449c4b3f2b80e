//! Environment variable loading.
//!
//! Every setting has a default; empty variables count as unset.
//! Numeric variables that fail to parse are errors rather than silently defaulted.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::schema::PipelineConfig;

/// Error returned for environment values that cannot be parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var \"{var_name}\": {reason}")]
    InvalidValue {
        var_name: String,
        value: String,
        reason: String,
    },
}

/// Build the config from the process environment.
pub fn from_env() -> Result<PipelineConfig, ConfigError> {
    from_vars(&std::env::vars().collect())
}

/// Build the config from a provided map (useful for testing).
pub fn from_vars(vars: &HashMap<String, String>) -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    config.storage.connection_string = string(vars, "BLOB_STORAGE_CONNECTION_STRING");
    set_string(vars, "DOCPIPE_STORAGE_DIR", &mut config.storage.local_dir);
    set_string(vars, "DOCPIPE_INPUT_CONTAINER", &mut config.storage.input_container);
    set_string(vars, "DOCPIPE_OUTPUT_CONTAINER", &mut config.storage.output_container);

    config.ocr.endpoint = string(vars, "COGNITIVE_SERVICES_ENDPOINT");
    config.ocr.api_key = string(vars, "COGNITIVE_SERVICES_KEY");
    set_string(vars, "DOCPIPE_OCR_LOCALE", &mut config.ocr.locale);

    config.llm.api_key = string(vars, "OPENAI_API_KEY");
    set_string(vars, "OPENAI_BASE_URL", &mut config.llm.base_url);
    set_string(vars, "CHAT_MODEL_NAME", &mut config.llm.model);

    set_parsed(
        vars,
        "DOCPIPE_RETRY_FIRST_INTERVAL_MS",
        &mut config.retry.first_retry_interval_ms,
    )?;
    set_parsed(vars, "DOCPIPE_RETRY_MAX_ATTEMPTS", &mut config.retry.max_attempts)?;
    set_parsed(vars, "DOCPIPE_RETRY_BACKOFF", &mut config.retry.backoff_coefficient)?;
    set_parsed(
        vars,
        "DOCPIPE_RETRY_MAX_INTERVAL_MS",
        &mut config.retry.max_retry_interval_ms,
    )?;

    set_string(vars, "DOCPIPE_BIND", &mut config.server.bind_address);
    set_parsed(vars, "DOCPIPE_PORT", &mut config.server.port)?;
    set_parsed(
        vars,
        "DOCPIPE_POLL_INTERVAL_SECS",
        &mut config.server.poll_interval_secs,
    )?;

    set_string(vars, "DOCPIPE_DB", &mut config.db_path);
    set_string(vars, "DOCPIPE_LOG_DIR", &mut config.log_dir);
    set_string(vars, "RUST_LOG", &mut config.log_level);

    Ok(config)
}

fn string(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set_string(vars: &HashMap<String, String>, name: &str, target: &mut String) {
    if let Some(value) = string(vars, name) {
        *target = value;
    }
}

fn set_parsed<T>(vars: &HashMap<String, String>, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = string(vars, name) {
        *target = raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var_name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.retry.first_retry_interval_ms, 5_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.ocr.locale, "en-US");
        assert_eq!(config.storage.input_container, "input");
        assert_eq!(config.storage.output_container, "output");
        assert!(config.storage.connection_string.is_none());
    }

    #[test]
    fn reads_provider_settings() {
        let config = from_vars(&env(&[
            ("BLOB_STORAGE_CONNECTION_STRING", "UseDevelopmentStorage=true"),
            ("COGNITIVE_SERVICES_ENDPOINT", "https://ocr.example.com/"),
            ("COGNITIVE_SERVICES_KEY", "k"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CHAT_MODEL_NAME", "gpt-4o-mini"),
        ]))
        .unwrap();
        assert_eq!(
            config.storage.connection_string.as_deref(),
            Some("UseDevelopmentStorage=true")
        );
        assert_eq!(config.ocr.endpoint.as_deref(), Some("https://ocr.example.com/"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn parses_retry_overrides() {
        let config = from_vars(&env(&[
            ("DOCPIPE_RETRY_FIRST_INTERVAL_MS", "250"),
            ("DOCPIPE_RETRY_MAX_ATTEMPTS", "5"),
            ("DOCPIPE_RETRY_BACKOFF", "2.0"),
        ]))
        .unwrap();
        assert_eq!(config.retry.first_retry_interval_ms, 250);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_coefficient, 2.0);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = from_vars(&env(&[("CHAT_MODEL_NAME", "  "), ("OPENAI_API_KEY", "")])).unwrap();
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn error_on_unparsable_number() {
        let err = from_vars(&env(&[("DOCPIPE_RETRY_MAX_ATTEMPTS", "three")])).unwrap_err();
        assert!(err.to_string().contains("DOCPIPE_RETRY_MAX_ATTEMPTS"));
    }
}

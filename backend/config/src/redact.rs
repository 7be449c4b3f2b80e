//! Config redaction: produce safe-to-share config snapshots by masking sensitive fields.
//!
//! Masks API keys and the secret parts of storage connection strings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static API_KEY_KEYS: &[&str] = &["api_key", "apiKey", "key", "secret", "password", "token"];

static CONNECTION_STRING_KEYS: &[&str] = &["connection_string", "connectionString"];

/// Secret segments of an Azure storage connection string.
static CONNECTION_SECRET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(AccountKey|SharedAccessSignature)=[^;]*").unwrap());

/// Redact a config JSON value, replacing all sensitive fields.
///
/// The resulting value is safe to log or print from the CLI.
pub fn redact(value: &Value) -> Value {
    redact_recursive(value, "")
}

fn is_sensitive_key(key: &str) -> bool {
    API_KEY_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn is_connection_string_key(key: &str) -> bool {
    CONNECTION_STRING_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn redact_string(s: &str, key: &str) -> Value {
    if s.is_empty() {
        return Value::String(String::new());
    }
    if is_connection_string_key(key) {
        return Value::String(CONNECTION_SECRET_PATTERN.replace_all(s, "$1=***").into_owned());
    }
    if is_sensitive_key(key) {
        // Preserve length hint: show first 4 chars + ***
        let hint = if s.chars().count() > 4 {
            format!("{}***", s.chars().take(4).collect::<String>())
        } else {
            "***".to_string()
        };
        return Value::String(hint);
    }
    Value::String(s.to_string())
}

fn redact_recursive(value: &Value, key: &str) -> Value {
    match value {
        Value::String(s) => redact_string(s, key),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| redact_recursive(v, key)).collect()),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                result.insert(k.clone(), redact_recursive(v, k));
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

/// Collect the paths of every field [`redact`] would mask.
pub fn collect_redacted_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths_recursive(value, "", &mut paths);
    paths
}

fn collect_paths_recursive(value: &Value, path: &str, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => {
            let key = path.rsplit('.').next().unwrap_or("");
            if is_sensitive_key(key)
                || (is_connection_string_key(key) && CONNECTION_SECRET_PATTERN.is_match(s))
            {
                out.push(path.to_string());
            }
        }
        Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                collect_paths_recursive(v, &format!("{path}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                collect_paths_recursive(v, &child_path, out);
            }
        }
        _ => {}
    }
}

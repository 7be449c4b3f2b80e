//! Log Redaction Layer
//!
//! Scrubs storage account keys, SAS signatures, API keys, and bearer tokens from strings prior to logging.

use regex::Regex;
use once_cell::sync::Lazy;

static ACCOUNT_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(AccountKey|SharedAccessSignature)=[^;\s]*").unwrap());
static SAS_SIG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([?&]sig=)[^&\s]*").unwrap());
static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9_\-]{16,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)").unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let mut redacted = ACCOUNT_KEY_RE.replace_all(input, "$1=[REDACTED]").to_string();
    redacted = SAS_SIG_RE.replace_all(&redacted, "${1}[REDACTED]").to_string();
    redacted = API_KEY_RE.replace_all(&redacted, "[REDACTED_TOKEN]").to_string();
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let raw = "calling with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9 and sk-abcdefghijklmnopqrstuv";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
        assert!(!clean.contains("sk-abcdefghijklmnopqrstuv"));
    }

    #[test]
    fn test_connection_string_redaction() {
        let raw = "AccountName=acct;AccountKey=c2VjcmV0a2V5;EndpointSuffix=core.windows.net";
        let clean = redact_sensitive_data(raw);
        assert_eq!(
            clean,
            "AccountName=acct;AccountKey=[REDACTED];EndpointSuffix=core.windows.net"
        );
    }

    #[test]
    fn test_sas_url_redaction() {
        let raw = "GET https://acct.blob.core.windows.net/input/a.pdf?sv=2021-08-06&sig=abc%2Bdef&sp=r";
        let clean = redact_sensitive_data(raw);
        assert!(clean.contains("sig=[REDACTED]&sp=r"));
        assert!(!clean.contains("abc%2Bdef"));
    }
}

//! Azure storage connection-string parsing.
//!
//! Accepts the three forms the portal and emulator hand out:
//! - `DefaultEndpointsProtocol=https;AccountName=..;AccountKey=..;EndpointSuffix=..`
//! - `BlobEndpoint=https://..;SharedAccessSignature=sv=..&sig=..`
//! - `UseDevelopmentStorage=true` (Azurite on 127.0.0.1:10000)

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::StorageError;

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests to the account are authorized.
#[derive(Clone)]
pub enum Credential {
    /// Decoded account key used for HMAC-SHA256 request signing.
    SharedKey { key: Vec<u8> },
    /// Shared access signature appended to every request's query string.
    Sas { token: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SharedKey { .. } => f.write_str("SharedKey(***)"),
            Credential::Sas { .. } => f.write_str("Sas(***)"),
        }
    }
}

/// A parsed storage account: where to send blob requests and how to sign them.
#[derive(Debug, Clone)]
pub struct StorageAccount {
    pub account_name: String,
    /// Blob service endpoint without a trailing slash.
    pub blob_endpoint: String,
    pub credential: Credential,
}

impl StorageAccount {
    pub fn parse(connection_string: &str) -> Result<Self, StorageError> {
        let fields: HashMap<String, String> = connection_string
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.split_once('=')
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                    .ok_or_else(|| {
                        StorageError::InvalidConnectionString(format!(
                            "segment '{part}' is not key=value"
                        ))
                    })
            })
            .collect::<Result<_, _>>()?;

        if fields
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Self::development();
        }

        let account_name = fields.get("accountname").cloned();
        let blob_endpoint = match (fields.get("blobendpoint"), &account_name) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(name)) => {
                let protocol = fields
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = fields
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{name}.blob.{suffix}")
            }
            (None, None) => {
                return Err(StorageError::InvalidConnectionString(
                    "neither BlobEndpoint nor AccountName is present".into(),
                ))
            }
        };

        let credential = if let Some(token) = fields.get("sharedaccesssignature") {
            Credential::Sas {
                token: token.trim_start_matches('?').to_string(),
            }
        } else if let Some(key) = fields.get("accountkey") {
            let key = STANDARD.decode(key).map_err(|e| {
                StorageError::InvalidConnectionString(format!("AccountKey is not base64: {e}"))
            })?;
            Credential::SharedKey { key }
        } else {
            return Err(StorageError::InvalidConnectionString(
                "neither AccountKey nor SharedAccessSignature is present".into(),
            ));
        };

        let account_name = match (account_name, &credential) {
            (Some(name), _) => name,
            (None, Credential::Sas { .. }) => account_from_endpoint(&blob_endpoint),
            (None, Credential::SharedKey { .. }) => {
                return Err(StorageError::InvalidConnectionString(
                    "AccountName is required with AccountKey".into(),
                ))
            }
        };

        Ok(Self {
            account_name,
            blob_endpoint,
            credential,
        })
    }

    /// The well-known Azurite emulator account.
    pub fn development() -> Result<Self, StorageError> {
        let key = STANDARD
            .decode(DEV_ACCOUNT_KEY)
            .map_err(|e| StorageError::InvalidConnectionString(e.to_string()))?;
        Ok(Self {
            account_name: DEV_ACCOUNT_NAME.to_string(),
            blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
            credential: Credential::SharedKey { key },
        })
    }
}

/// `https://acct.blob.core.windows.net` -> `acct`
fn account_from_endpoint(endpoint: &str) -> String {
    endpoint
        .split("://")
        .nth(1)
        .unwrap_or(endpoint)
        .split(['.', '/', ':'])
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_account_key_form() {
        let account = StorageAccount::parse(
            "DefaultEndpointsProtocol=https;AccountName=docs;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(account.account_name, "docs");
        assert_eq!(account.blob_endpoint, "https://docs.blob.core.windows.net");
        match account.credential {
            Credential::SharedKey { key } => assert_eq!(key, b"secret"),
            other => panic!("unexpected credential {other:?}"),
        }
    }

    #[test]
    fn parses_sas_form() {
        let account = StorageAccount::parse(
            "BlobEndpoint=https://docs.blob.core.windows.net/;SharedAccessSignature=sv=2021-08-06&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(account.account_name, "docs");
        assert_eq!(account.blob_endpoint, "https://docs.blob.core.windows.net");
        match account.credential {
            Credential::Sas { token } => assert_eq!(token, "sv=2021-08-06&sig=abc%3D"),
            other => panic!("unexpected credential {other:?}"),
        }
    }

    #[test]
    fn parses_development_storage() {
        let account = StorageAccount::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(account.account_name, "devstoreaccount1");
        assert_eq!(account.blob_endpoint, "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn rejects_incomplete_strings() {
        assert!(StorageAccount::parse("AccountName=docs").is_err());
        assert!(StorageAccount::parse("AccountKey=c2VjcmV0").is_err());
        assert!(StorageAccount::parse("AccountName=docs;AccountKey=!!notbase64").is_err());
        assert!(StorageAccount::parse("garbage").is_err());
    }

    #[test]
    fn debug_hides_secrets() {
        let account =
            StorageAccount::parse("AccountName=docs;AccountKey=c2VjcmV0").unwrap();
        assert!(!format!("{account:?}").contains("secret"));
    }
}

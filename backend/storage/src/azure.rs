//! Azure Blob Storage backend over the REST API.
//!
//! Requests are authorized either with SharedKey (HMAC-SHA256 over the
//! canonicalized request) or by appending a SAS token to the query string.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, Response, StatusCode, Url};
use sha2::Sha256;
use tracing::{debug, info};

use docpipe_core::{BlobEntry, BlobStore, PipelineResult};

use crate::connection::{Credential, StorageAccount};
use crate::error::{validate_blob_name, StorageError};

const API_VERSION: &str = "2021-08-06";

static BLOB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Blob>.*?<Name>(.*?)</Name>.*?<Etag>(.*?)</Etag>.*?</Blob>").unwrap()
});
static NEXT_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<NextMarker>(.+?)</NextMarker>").unwrap());

/// Azure Blob Storage gateway.
pub struct AzureBlobStore {
    client: Client,
    account: StorageAccount,
}

impl AzureBlobStore {
    pub fn new(account: StorageAccount) -> Self {
        Self {
            client: Client::new(),
            account,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.account.blob_endpoint)
            .map_err(|e| StorageError::InvalidConnectionString(format!("blob endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                StorageError::InvalidConnectionString("blob endpoint cannot be a base URL".into())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sign (or SAS-decorate) and send one request.
    async fn send(
        &self,
        method: Method,
        mut url: Url,
        body: Option<(Vec<u8>, &str)>,
        extra_headers: &[(&str, &str)],
    ) -> Result<Response, StorageError> {
        let mut ms_headers: BTreeMap<String, String> = BTreeMap::new();
        ms_headers.insert(
            "x-ms-date".into(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        ms_headers.insert("x-ms-version".into(), API_VERSION.into());
        for (name, value) in extra_headers {
            ms_headers.insert(name.to_ascii_lowercase(), value.to_string());
        }

        let (content_length, content_type) = body
            .as_ref()
            .map(|(bytes, ct)| (bytes.len(), *ct))
            .unwrap_or((0, ""));

        let authorization = match &self.account.credential {
            Credential::SharedKey { key } => {
                let to_sign = string_to_sign(
                    method.as_str(),
                    content_length,
                    content_type,
                    &ms_headers,
                    &self.account.account_name,
                    &url,
                );
                Some(format!(
                    "SharedKey {}:{}",
                    self.account.account_name,
                    sign(key, &to_sign)?
                ))
            }
            Credential::Sas { token } => {
                let query = match url.query() {
                    Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
                    _ => token.clone(),
                };
                url.set_query(Some(&query));
                None
            }
        };

        debug!(method = %method, path = %url.path(), "Sending blob request");

        let mut request = self.client.request(method, url);
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = authorization {
            request = request.header("Authorization", auth);
        }
        if let Some((bytes, ct)) = body {
            request = request.header("Content-Type", ct).body(bytes);
        }

        Ok(request.send().await?)
    }

    async fn check(
        response: Response,
        container: &str,
        name: &str,
    ) -> Result<Response, StorageError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn download_blob(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        validate_blob_name(name)?;
        let url = self.url(&[container, name])?;
        let response = self.send(Method::GET, url, None, &[]).await?;
        let response = Self::check(response, container, name).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload_blob(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        validate_blob_name(name)?;
        let url = self.url(&[container, name])?;
        let size = data.len();
        let response = self
            .send(
                Method::PUT,
                url,
                Some((data, content_type_for(name))),
                &[("x-ms-blob-type", "BlockBlob")],
            )
            .await?;
        Self::check(response, container, name).await?;
        info!(container = %container, name = %name, bytes = size, "Uploaded blob");
        Ok(())
    }

    async fn list_blobs(&self, container: &str) -> Result<Vec<BlobEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.url(&[container])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container").append_pair("comp", "list");
                if let Some(m) = &marker {
                    query.append_pair("marker", m);
                }
            }
            let response = self.send(Method::GET, url, None, &[]).await?;
            let response = Self::check(response, container, "").await?;
            let body = response.text().await?;
            let (page, next) = parse_list_response(&body);
            entries.extend(page);
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn name(&self) -> &str {
        "azure"
    }

    async fn download(&self, container: &str, name: &str) -> PipelineResult<Vec<u8>> {
        Ok(self.download_blob(container, name).await?)
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>) -> PipelineResult<()> {
        Ok(self.upload_blob(container, name, data).await?)
    }

    async fn list(&self, container: &str) -> PipelineResult<Vec<BlobEntry>> {
        Ok(self.list_blobs(container).await?)
    }
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".txt") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Canonical SharedKey string for the Blob service.
///
/// Field order: verb, content-encoding, content-language, content-length,
/// content-md5, content-type, date, if-modified-since, if-match,
/// if-none-match, if-unmodified-since, range, then x-ms-* headers and the resource.
fn string_to_sign(
    method: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &BTreeMap<String, String>,
    account_name: &str,
    url: &Url,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let canonical_headers: String = ms_headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    let mut canonical_resource = format!("/{account_name}{}", url.path());
    for (name, mut values) in params {
        values.sort();
        canonical_resource.push_str(&format!("\n{name}:{}", values.join(",")));
    }

    format!(
        "{method}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String, StorageError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StorageError::InvalidConnectionString(format!("account key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Pull blob names/etags and the continuation marker out of a List Blobs response.
fn parse_list_response(xml: &str) -> (Vec<BlobEntry>, Option<String>) {
    let entries = BLOB_RE
        .captures_iter(xml)
        .map(|caps| BlobEntry {
            name: unescape_xml(&caps[1]),
            etag: unescape_xml(&caps[2]),
        })
        .collect();
    let next = NEXT_MARKER_RE
        .captures(xml)
        .map(|caps| unescape_xml(&caps[1]))
        .filter(|m| !m.is_empty());
    (entries, next)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

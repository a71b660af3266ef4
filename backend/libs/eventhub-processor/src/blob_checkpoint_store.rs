//! Checkpoint store backed by an Azure Blob Storage container
//!
//! Each partition checkpoint is an empty block blob whose metadata carries
//! `sequencenumber` and, for checkpoints written by the Event Hubs SDKs, the
//! byte `offset`. Requests go straight to the Blob REST API and are
//! authorized with the account SharedKey (HMAC-SHA256).

use crate::checkpoint::{Checkpoint, CheckpointStore, ProcessorIdentity};
use crate::connection_string::StorageConnectionString;
use crate::error::{ProcessorError, ProcessorResult};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const STORAGE_API_VERSION: &str = "2021-08-06";
const OFFSET_METADATA: &str = "x-ms-meta-offset";
const SEQUENCE_NUMBER_METADATA: &str = "x-ms-meta-sequencenumber";

/// Checkpoint store writing one blob per partition into a container
#[derive(Debug, Clone)]
pub struct BlobCheckpointStore {
    http: reqwest::Client,
    account: StorageConnectionString,
    container: String,
}

impl BlobCheckpointStore {
    /// Create a store for `container` in the account of the connection string.
    ///
    /// The container must already exist.
    pub fn new(account: StorageConnectionString, container: &str) -> ProcessorResult<Self> {
        let container = container.trim();
        if container.is_empty() {
            return Err(ProcessorError::Configuration(
                "blob container name is required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            account,
            container: container.to_string(),
        })
    }

    /// Parse the storage connection string and create the store
    pub fn from_connection_string(connection_string: &str, container: &str) -> ProcessorResult<Self> {
        Self::new(StorageConnectionString::parse(connection_string)?, container)
    }

    fn blob_url(&self, blob_name: &str) -> ProcessorResult<Url> {
        let raw = format!(
            "{}/{}/{}",
            self.account.blob_endpoint(),
            self.container,
            blob_name
        );
        Url::parse(&raw).map_err(|e| ProcessorError::Configuration(format!("invalid blob URL {raw}: {e}")))
    }

    /// Build a signed request; `ms_headers` are the `x-ms-*` headers besides date and version.
    fn signed_request(
        &self,
        method: Method,
        url: Url,
        ms_headers: Vec<(String, String)>,
    ) -> ProcessorResult<reqwest::RequestBuilder> {
        let mut headers: Vec<(String, String)> = ms_headers;
        headers.push(("x-ms-date".to_string(), rfc1123_now()));
        headers.push(("x-ms-version".to_string(), STORAGE_API_VERSION.to_string()));

        let to_sign = string_to_sign(
            method.as_str(),
            0,
            "",
            &headers,
            self.account.account_name(),
            url.path(),
        );
        let signature = sign(self.account.account_key(), &to_sign)?;

        let mut request = self.http.request(method, url).header(
            "Authorization",
            format!("SharedKey {}:{}", self.account.account_name(), signature),
        );
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl CheckpointStore for BlobCheckpointStore {
    async fn get_checkpoint(
        &self,
        identity: &ProcessorIdentity,
        partition_id: &str,
    ) -> ProcessorResult<Option<Checkpoint>> {
        let blob_name = identity.checkpoint_blob_name(partition_id);
        let url = self.blob_url(&blob_name)?;

        let response = self
            .signed_request(Method::HEAD, url, Vec::new())?
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(blob = %blob_name, "No checkpoint stored for partition");
                Ok(None)
            }
            status if status.is_success() => {
                let headers = response.headers();
                match metadata_i64(headers, SEQUENCE_NUMBER_METADATA) {
                    Some(sequence_number) => Ok(Some(Checkpoint {
                        identity: identity.clone(),
                        partition_id: partition_id.to_string(),
                        sequence_number,
                        offset: metadata_i64(headers, OFFSET_METADATA),
                    })),
                    None => {
                        // a byte offset alone cannot be mapped to a source position
                        warn!(blob = %blob_name, "Checkpoint blob has no sequencenumber metadata, ignoring");
                        Ok(None)
                    }
                }
            }
            status => Err(ProcessorError::Checkpoint(format!(
                "HEAD {blob_name} returned {status}"
            ))),
        }
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> ProcessorResult<()> {
        let blob_name = checkpoint
            .identity
            .checkpoint_blob_name(&checkpoint.partition_id);
        let url = self.blob_url(&blob_name)?;

        let mut ms_headers = vec![
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
            (
                SEQUENCE_NUMBER_METADATA.to_string(),
                checkpoint.sequence_number.to_string(),
            ),
        ];
        if let Some(offset) = checkpoint.offset {
            ms_headers.push((OFFSET_METADATA.to_string(), offset.to_string()));
        }

        let response = self
            .signed_request(Method::PUT, url, ms_headers)?
            .body(Vec::<u8>::new())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Checkpoint(format!(
                "PUT {blob_name} returned {status}: {body}"
            )));
        }

        debug!(
            blob = %blob_name,
            sequence_number = checkpoint.sequence_number,
            "Checkpoint updated"
        );
        Ok(())
    }
}

fn metadata_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// SharedKey string-to-sign for a request without query parameters.
///
/// Layout: verb, then Content-Encoding, Content-Language, Content-Length
/// (empty when zero), Content-MD5, Content-Type, Date, If-Modified-Since,
/// If-Match, If-None-Match, If-Unmodified-Since, Range, each on its own line,
/// followed by the sorted `x-ms-*` headers and `/{account}{path}`.
pub(crate) fn string_to_sign(
    verb: &str,
    content_length: u64,
    content_type: &str,
    ms_headers: &[(String, String)],
    account_name: &str,
    path: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut canonical: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .filter(|(name, _)| name.starts_with("x-ms-"))
        .collect();
    canonical.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = canonical
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    format!(
        "{verb}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}/{account_name}{path}"
    )
}

/// Base64 HMAC-SHA256 of the string-to-sign keyed with the account key
pub(crate) fn sign(account_key: &[u8], string_to_sign: &str) -> ProcessorResult<String> {
    let mut mac = HmacSha256::new_from_slice(account_key)
        .map_err(|e| ProcessorError::InvalidConnectionString(format!("invalid account key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<(String, String)> {
        vec![
            ("x-ms-version".to_string(), STORAGE_API_VERSION.to_string()),
            ("X-MS-Date".to_string(), "Sun, 18 Oct 2026 12:00:00 GMT".to_string()),
            ("x-ms-meta-offset".to_string(), " 42 ".to_string()),
        ]
    }

    #[test]
    fn test_string_to_sign_layout() {
        let s = string_to_sign(
            "PUT",
            0,
            "",
            &headers(),
            "contagem",
            "/checkpoints/ns/hub/$default/checkpoint/0",
        );

        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines[0], "PUT");
        // 11 standard headers, all empty here
        assert!(lines[1..12].iter().all(|l| l.is_empty()));
        assert_eq!(lines[12], "x-ms-date:Sun, 18 Oct 2026 12:00:00 GMT");
        assert_eq!(lines[13], "x-ms-meta-offset:42");
        assert_eq!(lines[14], "x-ms-version:2021-08-06");
        assert_eq!(lines[15], "/contagem/checkpoints/ns/hub/$default/checkpoint/0");
    }

    #[test]
    fn test_string_to_sign_includes_non_zero_length() {
        let s = string_to_sign("PUT", 12, "text/plain", &[], "acc", "/c/b");
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines[3], "12");
        assert_eq!(lines[5], "text/plain");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign(b"secret", "payload").unwrap();
        let b = sign(b"secret", "payload").unwrap();
        let c = sign(b"other", "payload").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 32-byte MAC encodes to 44 base64 chars
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_blob_url_uses_container_and_blob_name() {
        let store = BlobCheckpointStore::from_connection_string(
            "UseDevelopmentStorage=true",
            "checkpoints",
        )
        .unwrap();
        let identity = ProcessorIdentity::new("ns.servicebus.windows.net", "contagem", "$Default");
        let url = store
            .blob_url(&identity.checkpoint_blob_name("1"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/checkpoints/ns.servicebus.windows.net/contagem/$default/checkpoint/1"
        );
    }

    #[test]
    fn test_empty_container_is_rejected() {
        let err = BlobCheckpointStore::from_connection_string("UseDevelopmentStorage=true", " ")
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Configuration(_)));
    }
}

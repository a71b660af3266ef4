//! Parsers for Event Hubs and Storage account connection strings
//!
//! Both formats are `Key=Value` pairs separated by `;`. Values may themselves
//! contain `=` (base64 keys), so each pair is split on the first `=` only.

use crate::error::{ProcessorError, ProcessorResult};
use base64::Engine;
use std::fmt;

/// Port of the Event Hubs Kafka endpoint
pub const KAFKA_ENDPOINT_PORT: u16 = 9093;

const DEV_STORAGE_ACCOUNT: &str = "devstoreaccount1";
const DEV_STORAGE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_STORAGE_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

fn pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

fn lookup<'a>(raw: &'a str, key: &str) -> Option<&'a str> {
    pairs(raw)
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Parsed Event Hubs namespace connection string
#[derive(Clone)]
pub struct EventHubConnectionString {
    raw: String,
    fully_qualified_namespace: String,
    entity_path: Option<String>,
}

impl EventHubConnectionString {
    /// Parse `Endpoint=sb://<namespace>/;SharedAccessKeyName=..;SharedAccessKey=..[;EntityPath=..]`
    pub fn parse(raw: &str) -> ProcessorResult<Self> {
        let endpoint = lookup(raw, "Endpoint").ok_or_else(|| {
            ProcessorError::InvalidConnectionString("missing Endpoint".to_string())
        })?;

        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(endpoint)
            .trim_end_matches('/');
        let host = host.split(|c: char| c == '/' || c == ':').next().unwrap_or_default();

        if host.is_empty() {
            return Err(ProcessorError::InvalidConnectionString(format!(
                "Endpoint has no host: {endpoint}"
            )));
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            fully_qualified_namespace: host.to_ascii_lowercase(),
            entity_path: lookup(raw, "EntityPath").map(str::to_string),
        })
    }

    /// Namespace host, e.g. `contoso.servicebus.windows.net`
    pub fn fully_qualified_namespace(&self) -> &str {
        &self.fully_qualified_namespace
    }

    /// Event hub name embedded in the connection string, if any
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// Kafka bootstrap server for the namespace
    pub fn kafka_bootstrap_server(&self) -> String {
        format!("{}:{}", self.fully_qualified_namespace, KAFKA_ENDPOINT_PORT)
    }

    /// Full connection string, used as the SASL PLAIN password
    pub fn as_sasl_password(&self) -> &str {
        &self.raw
    }

    /// Resolve the event hub name against the `EntityPath` key.
    ///
    /// A connection string scoped to one event hub cannot be used for another.
    pub fn resolve_event_hub(&self, configured: &str) -> ProcessorResult<String> {
        match (self.entity_path(), configured.trim()) {
            (Some(path), "") => Ok(path.to_string()),
            (None, "") => Err(ProcessorError::Configuration(
                "event hub name is required".to_string(),
            )),
            (Some(path), name) if !path.eq_ignore_ascii_case(name) => {
                Err(ProcessorError::Configuration(format!(
                    "connection string EntityPath '{path}' does not match event hub '{name}'"
                )))
            }
            (_, name) => Ok(name.to_string()),
        }
    }
}

impl fmt::Debug for EventHubConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHubConnectionString")
            .field("fully_qualified_namespace", &self.fully_qualified_namespace)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

/// Parsed Storage account connection string
#[derive(Clone)]
pub struct StorageConnectionString {
    account_name: String,
    account_key: Vec<u8>,
    blob_endpoint: String,
}

impl StorageConnectionString {
    /// Parse an account-key connection string or `UseDevelopmentStorage=true`
    pub fn parse(raw: &str) -> ProcessorResult<Self> {
        if lookup(raw, "UseDevelopmentStorage").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Self::from_parts(DEV_STORAGE_ACCOUNT, DEV_STORAGE_KEY, DEV_STORAGE_BLOB_ENDPOINT);
        }

        let account_name = lookup(raw, "AccountName").ok_or_else(|| {
            ProcessorError::InvalidConnectionString("missing AccountName".to_string())
        })?;
        let account_key = lookup(raw, "AccountKey").ok_or_else(|| {
            ProcessorError::InvalidConnectionString("missing AccountKey".to_string())
        })?;

        let blob_endpoint = match lookup(raw, "BlobEndpoint") {
            Some(endpoint) => endpoint.to_string(),
            None => {
                let protocol = lookup(raw, "DefaultEndpointsProtocol").unwrap_or("https");
                let suffix = lookup(raw, "EndpointSuffix").unwrap_or("core.windows.net");
                format!("{protocol}://{account_name}.blob.{suffix}")
            }
        };

        Self::from_parts(account_name, account_key, &blob_endpoint)
    }

    fn from_parts(account_name: &str, account_key: &str, blob_endpoint: &str) -> ProcessorResult<Self> {
        let account_key = base64::engine::general_purpose::STANDARD
            .decode(account_key)
            .map_err(|e| {
                ProcessorError::InvalidConnectionString(format!("AccountKey is not base64: {e}"))
            })?;

        Ok(Self {
            account_name: account_name.to_string(),
            account_key,
            blob_endpoint: blob_endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn account_key(&self) -> &[u8] {
        &self.account_key
    }

    /// Blob service endpoint without trailing slash
    pub fn blob_endpoint(&self) -> &str {
        &self.blob_endpoint
    }
}

impl fmt::Debug for StorageConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConnectionString")
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EH: &str = "Endpoint=sb://Contoso.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=abc/def==";

    #[test]
    fn test_parse_event_hub_namespace() {
        let cs = EventHubConnectionString::parse(EH).unwrap();
        assert_eq!(cs.fully_qualified_namespace(), "contoso.servicebus.windows.net");
        assert_eq!(cs.entity_path(), None);
        assert_eq!(
            cs.kafka_bootstrap_server(),
            "contoso.servicebus.windows.net:9093"
        );
        assert_eq!(cs.as_sasl_password(), EH);
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let err = EventHubConnectionString::parse("SharedAccessKey=abc").unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidConnectionString(_)));
    }

    #[test]
    fn test_entity_path_must_match_event_hub() {
        let cs = EventHubConnectionString::parse(&format!("{EH};EntityPath=contagem")).unwrap();
        assert_eq!(cs.resolve_event_hub("contagem").unwrap(), "contagem");
        assert_eq!(cs.resolve_event_hub("").unwrap(), "contagem");
        assert!(matches!(
            cs.resolve_event_hub("other"),
            Err(ProcessorError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let cs = EventHubConnectionString::parse(EH).unwrap();
        assert!(!format!("{cs:?}").contains("abc/def"));
    }

    #[test]
    fn test_parse_storage_account() {
        let cs = StorageConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=contagem;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(cs.account_name(), "contagem");
        assert_eq!(cs.account_key(), b"secret");
        assert_eq!(cs.blob_endpoint(), "https://contagem.blob.core.windows.net");
    }

    #[test]
    fn test_parse_development_storage() {
        let cs = StorageConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(cs.account_name(), "devstoreaccount1");
        assert_eq!(cs.blob_endpoint(), "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn test_storage_requires_account_key() {
        let err = StorageConnectionString::parse("AccountName=contagem").unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidConnectionString(_)));
    }
}

use crate::error::{Result, WorkerError};
use eventhub_processor::{
    EventHubsProcessorSettings, EventProcessorOptions, KafkaSourceOptions, DEFAULT_CONSUMER_GROUP,
};
use std::fmt;
use std::time::Duration;

const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 60_000;

/// Worker configuration, read once at startup
#[derive(Clone)]
pub struct WorkerConfig {
    /// `ConnectionStrings:BaseContagem`, Postgres URL of the results database
    pub database_url: String,
    pub event_hubs: EventHubsConfig,
    /// `IntervaloMensagemWorkerAtivo`, period of the "worker active" log line
    pub liveness_interval: Duration,
    /// Apply bundled migrations before consuming
    pub run_migrations: bool,
}

/// `AzureEventHubs:*` section
#[derive(Clone)]
pub struct EventHubsConfig {
    pub connection_string: String,
    pub event_hub: String,
    pub consumer_group: String,
    pub blob_storage_connection_string: String,
    pub blob_container: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a key lookup.
    ///
    /// Section separators may be written `__` (environment variables) or `:`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(&key.replace(':', "__"))
                .or_else(|| lookup(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| -> Result<String> {
            get(key).ok_or_else(|| WorkerError::Config(format!("{key} not set")))
        };

        let liveness_ms = match get("IntervaloMensagemWorkerAtivo") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                WorkerError::Config(format!(
                    "IntervaloMensagemWorkerAtivo must be an integer number of milliseconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_LIVENESS_INTERVAL_MS,
        };
        if liveness_ms == 0 {
            return Err(WorkerError::Config(
                "IntervaloMensagemWorkerAtivo must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_url: require("ConnectionStrings:BaseContagem")?,
            event_hubs: EventHubsConfig {
                connection_string: require("AzureEventHubs:EventHubsConnectionString")?,
                event_hub: require("AzureEventHubs:EventHub")?,
                consumer_group: get("AzureEventHubs:ConsumerGroup")
                    .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
                blob_storage_connection_string: require(
                    "AzureEventHubs:BlobStorageConnectionString",
                )?,
                blob_container: require("AzureEventHubs:BlobContainer")?,
            },
            liveness_interval: Duration::from_millis(liveness_ms),
            run_migrations: get("RUN_MIGRATIONS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        })
    }

    /// Settings for the event processor client
    pub fn processor_settings(&self) -> EventHubsProcessorSettings {
        EventHubsProcessorSettings {
            event_hubs_connection_string: self.event_hubs.connection_string.clone(),
            event_hub: self.event_hubs.event_hub.clone(),
            consumer_group: self.event_hubs.consumer_group.clone(),
            blob_storage_connection_string: self.event_hubs.blob_storage_connection_string.clone(),
            blob_container: self.event_hubs.blob_container.clone(),
            kafka: KafkaSourceOptions::default(),
            processor: EventProcessorOptions::default(),
        }
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("database_url", &"<redacted>")
            .field("event_hubs", &self.event_hubs)
            .field("liveness_interval", &self.liveness_interval)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl fmt::Debug for EventHubsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHubsConfig")
            .field("event_hub", &self.event_hub)
            .field("consumer_group", &self.consumer_group)
            .field("blob_container", &self.blob_container)
            .finish_non_exhaustive()
    }
}

//! Wiring of an [`EventProcessorClient`] from Azure connection strings

use crate::blob_checkpoint_store::BlobCheckpointStore;
use crate::checkpoint::ProcessorIdentity;
use crate::connection_string::EventHubConnectionString;
use crate::error::ProcessorResult;
use crate::processor::{EventHandler, EventProcessorClient, EventProcessorOptions};
use crate::source::{event_hubs_client_config, KafkaEventSource, KafkaSourceOptions};
use std::sync::Arc;

/// Default consumer group of every event hub
pub const DEFAULT_CONSUMER_GROUP: &str = "$Default";

/// Everything needed to bind a processor to an event hub and a checkpoint container
#[derive(Clone)]
pub struct EventHubsProcessorSettings {
    pub event_hubs_connection_string: String,
    pub event_hub: String,
    pub consumer_group: String,
    pub blob_storage_connection_string: String,
    pub blob_container: String,
    pub kafka: KafkaSourceOptions,
    pub processor: EventProcessorOptions,
}

impl std::fmt::Debug for EventHubsProcessorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHubsProcessorSettings")
            .field("event_hub", &self.event_hub)
            .field("consumer_group", &self.consumer_group)
            .field("blob_container", &self.blob_container)
            .finish_non_exhaustive()
    }
}

impl EventProcessorClient {
    /// Create a processor reading the event hub through its Kafka endpoint and
    /// checkpointing into the blob container.
    pub fn for_event_hubs(
        settings: &EventHubsProcessorSettings,
        handler: Arc<dyn EventHandler>,
    ) -> ProcessorResult<Self> {
        let connection = EventHubConnectionString::parse(&settings.event_hubs_connection_string)?;
        let event_hub = connection.resolve_event_hub(&settings.event_hub)?;
        let consumer_group = match settings.consumer_group.trim() {
            "" => DEFAULT_CONSUMER_GROUP,
            group => group,
        };

        let identity = ProcessorIdentity::new(
            connection.fully_qualified_namespace(),
            event_hub,
            consumer_group,
        );

        let store = BlobCheckpointStore::from_connection_string(
            &settings.blob_storage_connection_string,
            &settings.blob_container,
        )?;

        let client_config = event_hubs_client_config(&connection, consumer_group, &settings.kafka);
        let source = KafkaEventSource::new(&client_config, &identity, settings.kafka.seek_timeout)?;

        Ok(Self::new(
            identity,
            Arc::new(source),
            Arc::new(store),
            handler,
            settings.processor.clone(),
        ))
    }
}

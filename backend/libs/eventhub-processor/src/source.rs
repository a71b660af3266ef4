//! Event sources feeding the processor
//!
//! The production source reads from the Event Hubs Kafka endpoint; partition
//! ownership across processor instances is left to the Kafka consumer group.
//! On that endpoint the Kafka offset of a record is the event sequence number,
//! so positions are expressed as sequence numbers throughout.

use crate::checkpoint::ProcessorIdentity;
use crate::connection_string::EventHubConnectionString;
use crate::error::{ProcessorError, ProcessorResult};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One event as delivered by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub partition_id: String,
    /// Position within the partition, increasing by one per event
    pub sequence_number: i64,
    pub body: Vec<u8>,
}

impl EventData {
    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Stream of events plus the position controls the processor needs
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next event from any owned partition
    async fn receive(&self) -> ProcessorResult<EventData>;

    /// Move the read position of a partition so the next event is `sequence_number`
    async fn seek(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()>;

    /// Record `sequence_number` as processed on the source side (consumer group lag)
    fn store_offset(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()>;
}

/// Kafka consumer settings for the Event Hubs Kafka endpoint
#[derive(Debug, Clone)]
pub struct KafkaSourceOptions {
    pub session_timeout: Duration,
    pub auto_commit_interval: Duration,
    pub seek_timeout: Duration,
}

impl Default for KafkaSourceOptions {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            auto_commit_interval: Duration::from_secs(5),
            seek_timeout: Duration::from_secs(10),
        }
    }
}

/// Build the librdkafka configuration for an Event Hubs namespace
pub fn event_hubs_client_config(
    connection: &EventHubConnectionString,
    consumer_group: &str,
    options: &KafkaSourceOptions,
) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", connection.kafka_bootstrap_server())
        .set("security.protocol", "SASL_SSL")
        .set("sasl.mechanism", "PLAIN")
        .set("sasl.username", "$ConnectionString")
        .set("sasl.password", connection.as_sasl_password())
        .set("group.id", consumer_group)
        // offsets are stored explicitly on checkpoint, then auto-committed
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set(
            "auto.commit.interval.ms",
            options.auto_commit_interval.as_millis().to_string(),
        )
        .set("auto.offset.reset", "earliest")
        .set(
            "session.timeout.ms",
            options.session_timeout.as_millis().to_string(),
        )
        .set("enable.partition.eof", "false");
    config
}

/// Event source reading one event hub through a Kafka consumer group
pub struct KafkaEventSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    seek_timeout: Duration,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe to the event hub of `identity`
    pub fn new(config: &ClientConfig, identity: &ProcessorIdentity, seek_timeout: Duration) -> ProcessorResult<Self> {
        let consumer: StreamConsumer = config.create()?;
        consumer.subscribe(&[identity.event_hub_name.as_str()])?;

        info!(
            namespace = %identity.fully_qualified_namespace,
            event_hub = %identity.event_hub_name,
            consumer_group = %identity.consumer_group,
            "Kafka event source subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: identity.event_hub_name.clone(),
            seek_timeout,
        })
    }

    fn partition(partition_id: &str) -> ProcessorResult<i32> {
        partition_id.parse().map_err(|_| {
            ProcessorError::Configuration(format!("invalid partition id: {partition_id}"))
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn receive(&self) -> ProcessorResult<EventData> {
        let message = self.consumer.recv().await?;

        Ok(EventData {
            partition_id: message.partition().to_string(),
            sequence_number: message.offset(),
            body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn seek(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()> {
        let partition = Self::partition(partition_id)?;
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        let timeout = self.seek_timeout;

        // librdkafka blocks until the fetcher acknowledges the seek
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(sequence_number), timeout)
        })
        .await??;
        Ok(())
    }

    fn store_offset(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()> {
        // the committed group offset is the next record to read
        self.consumer.store_offset(
            &self.topic,
            Self::partition(partition_id)?,
            sequence_number + 1,
        )?;
        Ok(())
    }
}

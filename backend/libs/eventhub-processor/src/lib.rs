//! # Event Hubs Processor Library
//!
//! Consumes an Azure Event Hub through its Kafka-compatible endpoint and
//! tracks progress with blob-backed checkpoints, the same way the Event Hubs
//! SDK processors do.
//!
//! ## Architecture
//!
//! ```text
//! Event Hub (Kafka endpoint) → KafkaEventSource → EventProcessorClient → EventHandler
//!                                                        ↓                  ↓
//!                                                 (load checkpoint)  (update_checkpoint)
//!                                                        ↓                  ↓
//!                                                  BlobCheckpointStore (one blob per partition)
//! ```
//!
//! Partition ownership is decided by the Kafka consumer group. The processor
//! only decides where to resume: on the first event of a partition it reads
//! that partition's checkpoint and skips everything at or before it.
//!
//! ## Usage Example
//!
//! ```ignore
//! use eventhub_processor::{
//!     EventHandler, EventHubsProcessorSettings, EventProcessorClient, ProcessErrorArgs,
//!     ProcessEventArgs, ProcessorResult,
//! };
//! use std::sync::Arc;
//!
//! struct PrintHandler;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for PrintHandler {
//!     async fn handle_event(&self, args: ProcessEventArgs) -> ProcessorResult<()> {
//!         println!("{}", args.data.body_as_str());
//!         args.update_checkpoint().await
//!     }
//!
//!     async fn handle_error(&self, args: ProcessErrorArgs) {
//!         eprintln!("{}: {}", args.operation, args.error);
//!     }
//! }
//!
//! # async fn example(settings: EventHubsProcessorSettings) -> ProcessorResult<()> {
//! let processor = EventProcessorClient::for_event_hubs(&settings, Arc::new(PrintHandler))?;
//! processor.start_processing();
//! // ...
//! processor.stop_processing().await;
//! # Ok(())
//! # }
//! ```

mod blob_checkpoint_store;
mod builder;
mod checkpoint;
mod connection_string;
mod error;
mod processor;
mod source;

pub use blob_checkpoint_store::BlobCheckpointStore;
pub use builder::{EventHubsProcessorSettings, DEFAULT_CONSUMER_GROUP};
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, ProcessorIdentity};
pub use connection_string::{EventHubConnectionString, StorageConnectionString};
pub use error::{ProcessorError, ProcessorResult};
pub use processor::{
    Checkpointer, EventHandler, EventProcessorClient, EventProcessorOptions, PartitionContext,
    ProcessErrorArgs, ProcessEventArgs,
};
pub use source::{event_hubs_client_config, EventData, EventSource, KafkaEventSource, KafkaSourceOptions};

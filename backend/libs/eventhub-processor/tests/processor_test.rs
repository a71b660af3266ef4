//! Dispatch loop tests for EventProcessorClient
//!
//! These tests verify:
//! 1. Events reach the handler in order and checkpoints land in the store
//! 2. Events at or before a stored checkpoint are skipped, by sequence number,
//!    including checkpoints written by the Event Hubs SDKs
//! 3. Receive and handler errors go to the error handler, the loop keeps going
//! 4. Start/stop lifecycle: idempotent start, nothing dispatched after stop,
//!    in-flight handler allowed to finish

use async_trait::async_trait;
use eventhub_processor::{
    Checkpoint, CheckpointStore, EventData, EventHandler, EventProcessorClient,
    EventProcessorOptions, EventSource, InMemoryCheckpointStore, ProcessErrorArgs,
    ProcessEventArgs, ProcessorError, ProcessorIdentity, ProcessorResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Source fed through an unbounded channel
struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessorResult<EventData>>>,
    seeks: Mutex<Vec<(String, i64)>>,
    stored: Mutex<Vec<(String, i64)>>,
}

impl ChannelSource {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<ProcessorResult<EventData>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Self {
            rx: tokio::sync::Mutex::new(rx),
            seeks: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
        });
        (source, tx)
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn receive(&self) -> ProcessorResult<EventData> {
        match self.rx.lock().await.recv().await {
            Some(item) => item,
            None => Err(ProcessorError::SourceClosed),
        }
    }

    async fn seek(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()> {
        self.seeks
            .lock()
            .unwrap()
            .push((partition_id.to_string(), sequence_number));
        Ok(())
    }

    fn store_offset(&self, partition_id: &str, sequence_number: i64) -> ProcessorResult<()> {
        self.stored
            .lock()
            .unwrap()
            .push((partition_id.to_string(), sequence_number));
        Ok(())
    }
}

/// Handler recording what it sees
#[derive(Default)]
struct RecordingHandler {
    bodies: Mutex<Vec<String>>,
    errors: Mutex<Vec<&'static str>>,
    fail_events: AtomicBool,
    delay: Option<Duration>,
    started: Notify,
}

impl RecordingHandler {
    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<&'static str> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, args: ProcessEventArgs) -> ProcessorResult<()> {
        self.started.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.bodies
            .lock()
            .unwrap()
            .push(args.data.body_as_str().into_owned());

        if self.fail_events.load(Ordering::SeqCst) {
            return Err(ProcessorError::Handler("rejected".to_string()));
        }
        args.update_checkpoint().await
    }

    async fn handle_error(&self, args: ProcessErrorArgs) {
        self.errors.lock().unwrap().push(args.operation);
    }
}

fn identity() -> ProcessorIdentity {
    ProcessorIdentity::new("ns.servicebus.windows.net", "contagem", "$Default")
}

fn event(partition: &str, sequence_number: i64, body: &str) -> EventData {
    EventData {
        partition_id: partition.to_string(),
        sequence_number,
        body: body.as_bytes().to_vec(),
    }
}

fn options() -> EventProcessorOptions {
    EventProcessorOptions {
        error_pause: Duration::from_millis(10),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn test_events_are_dispatched_and_checkpointed() {
    let (source, tx) = ChannelSource::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = Arc::new(RecordingHandler::default());
    let processor = EventProcessorClient::new(
        identity(),
        source.clone(),
        store.clone(),
        handler.clone(),
        options(),
    );

    assert!(processor.start_processing());
    tx.send(Ok(event("0", 0, "a"))).unwrap();
    tx.send(Ok(event("0", 1, "b"))).unwrap();
    tx.send(Ok(event("1", 0, "c"))).unwrap();

    wait_until(|| handler.bodies().len() == 3).await;
    processor.stop_processing().await;

    assert_eq!(handler.bodies(), vec!["a", "b", "c"]);
    let checkpoint = store.get_checkpoint(&identity(), "0").await.unwrap().unwrap();
    assert_eq!(checkpoint.sequence_number, 1);
    assert_eq!(checkpoint.offset, None);
    assert_eq!(store.len(), 2);
    assert_eq!(
        *source.stored.lock().unwrap(),
        vec![("0".to_string(), 0), ("0".to_string(), 1), ("1".to_string(), 0)]
    );
    assert!(handler.errors().is_empty());
}

#[tokio::test]
async fn test_events_before_checkpoint_are_skipped() {
    let (source, tx) = ChannelSource::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    store
        .update_checkpoint(&Checkpoint {
            identity: identity(),
            partition_id: "0".to_string(),
            sequence_number: 5,
            offset: None,
        })
        .await
        .unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let processor =
        EventProcessorClient::new(identity(), source.clone(), store.clone(), handler.clone(), options());

    processor.start_processing();
    for sequence_number in 4..=6 {
        tx.send(Ok(event("0", sequence_number, &format!("e{sequence_number}"))))
            .unwrap();
    }

    wait_until(|| handler.bodies().len() == 1).await;
    processor.stop_processing().await;

    assert_eq!(handler.bodies(), vec!["e6"]);
    assert_eq!(source.seeks.lock().unwrap()[0], ("0".to_string(), 6));
}

#[tokio::test]
async fn test_sdk_checkpoint_resumes_after_its_sequence_number() {
    let (source, tx) = ChannelSource::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    // SDK checkpoints carry a byte offset far beyond any sequence number
    store
        .update_checkpoint(&Checkpoint {
            identity: identity(),
            partition_id: "0".to_string(),
            sequence_number: 5,
            offset: Some(4_294_971_392),
        })
        .await
        .unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let processor =
        EventProcessorClient::new(identity(), source.clone(), store.clone(), handler.clone(), options());

    processor.start_processing();
    for sequence_number in 5..=8 {
        tx.send(Ok(event("0", sequence_number, &format!("e{sequence_number}"))))
            .unwrap();
    }

    wait_until(|| handler.bodies().len() == 3).await;
    processor.stop_processing().await;

    assert_eq!(handler.bodies(), vec!["e6", "e7", "e8"]);
    assert_eq!(*source.seeks.lock().unwrap(), vec![("0".to_string(), 6)]);

    let checkpoint = store.get_checkpoint(&identity(), "0").await.unwrap().unwrap();
    assert_eq!(checkpoint.sequence_number, 8);
    assert!(handler.errors().is_empty());
}

#[tokio::test]
async fn test_receive_error_is_reported_and_loop_continues() {
    let (source, tx) = ChannelSource::new();
    let handler = Arc::new(RecordingHandler::default());
    let processor = EventProcessorClient::new(
        identity(),
        source,
        Arc::new(InMemoryCheckpointStore::new()),
        handler.clone(),
        options(),
    );

    processor.start_processing();
    tx.send(Err(ProcessorError::Checkpoint("broker unavailable".to_string())))
        .unwrap();
    tx.send(Ok(event("0", 0, "after-error"))).unwrap();

    wait_until(|| handler.bodies().len() == 1).await;
    processor.stop_processing().await;

    assert_eq!(handler.errors(), vec!["Receive"]);
    assert_eq!(handler.bodies(), vec!["after-error"]);
}

#[tokio::test]
async fn test_handler_error_is_reported() {
    let (source, tx) = ChannelSource::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = Arc::new(RecordingHandler::default());
    handler.fail_events.store(true, Ordering::SeqCst);
    let processor =
        EventProcessorClient::new(identity(), source, store.clone(), handler.clone(), options());

    processor.start_processing();
    tx.send(Ok(event("0", 0, "x"))).unwrap();
    tx.send(Ok(event("0", 1, "y"))).unwrap();

    wait_until(|| handler.errors().len() == 2).await;
    processor.stop_processing().await;

    assert_eq!(handler.errors(), vec!["ProcessEvent", "ProcessEvent"]);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_while_idle_dispatches_nothing() {
    let (source, tx) = ChannelSource::new();
    let handler = Arc::new(RecordingHandler::default());
    let processor = EventProcessorClient::new(
        identity(),
        source,
        Arc::new(InMemoryCheckpointStore::new()),
        handler.clone(),
        options(),
    );

    assert!(processor.start_processing());
    assert!(!processor.start_processing());
    assert!(processor.is_running());

    processor.stop_processing().await;
    assert!(!processor.is_running());

    tx.send(Ok(event("0", 0, "late"))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.bodies().is_empty());

    // stopping twice is harmless
    processor.stop_processing().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_handler() {
    let (source, tx) = ChannelSource::new();
    let handler = Arc::new(RecordingHandler {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let processor = EventProcessorClient::new(
        identity(),
        source,
        Arc::new(InMemoryCheckpointStore::new()),
        handler.clone(),
        options(),
    );

    processor.start_processing();
    tx.send(Ok(event("0", 0, "slow"))).unwrap();
    handler.started.notified().await;

    processor.stop_processing().await;
    assert_eq!(handler.bodies(), vec!["slow"]);

    tx.send(Ok(event("0", 1, "after-stop"))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.bodies(), vec!["slow"]);
}

#[tokio::test]
async fn test_restart_after_stop_resumes_dispatch() {
    let (source, tx) = ChannelSource::new();
    let handler = Arc::new(RecordingHandler::default());
    let processor = EventProcessorClient::new(
        identity(),
        source,
        Arc::new(InMemoryCheckpointStore::new()),
        handler.clone(),
        options(),
    );

    processor.start_processing();
    processor.stop_processing().await;
    tx.send(Ok(event("0", 0, "queued"))).unwrap();

    assert!(processor.start_processing());
    wait_until(|| handler.bodies().len() == 1).await;
    processor.stop_processing().await;

    assert_eq!(handler.bodies(), vec!["queued"]);
}

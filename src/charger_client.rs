//! Request/response on top of the bus.
//!
//! A request registers a pending entry for (charger, kind), publishes the request command and
//! waits. The dispatcher task completes the entry when the matching frame comes in, or the
//! deadline passes first. The entry is registered before the command is published so a fast
//! answer cannot slip past.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::charger_state::{ChargerMetrics, ChargerStatus};
use crate::config::ClientConfig;
use crate::dispatcher::{ChargerEvent, Dispatcher};
use crate::error::{ClientError, Result};
use crate::message::{self, DecodedRecord, FrameDecoder, RecordKind};
use crate::pending::PendingTable;
use crate::record_mapper::{map_record, ChargerReading};
use crate::transport::{DefaultTopicScheme, TopicScheme, Transport};
use crate::ChargerId;

pub struct ChargerClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    topics: Arc<dyn TopicScheme>,
    table: PendingTable,
    events: broadcast::Sender<ChargerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl<T: Transport> ChargerClient<T> {
    /// Connect using the default topic layout for `config.user_id`.
    pub async fn connect(transport: T, config: ClientConfig) -> Result<Self> {
        let topics = DefaultTopicScheme::new(config.user_id.clone());
        Self::connect_with_topics(transport, config, topics).await
    }

    /// Connect the transport, subscribe to the frames of `topics` and start dispatching them.
    pub async fn connect_with_topics(
        transport: T,
        config: ClientConfig,
        topics: impl TopicScheme + 'static,
    ) -> Result<Self> {
        let topics: Arc<dyn TopicScheme> = Arc::new(topics);
        let filter = topics.subscription_filter();
        let inbound = transport.connect(&filter).await.map_err(ClientError::Transport)?;
        info!(%filter, "Connected");

        let table = PendingTable::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();

        let dispatcher = Dispatcher {
            table: table.clone(),
            topics: topics.clone(),
            decoder: FrameDecoder::new(config.strict_frame_length),
            events: events.clone(),
            sweep_interval: config.sweep_interval,
        };
        let dispatcher = tokio::spawn(dispatcher.run(inbound, shutdown_rx));

        Ok(Self {
            transport,
            config,
            topics,
            table,
            events,
            shutdown: Some(shutdown),
            dispatcher: Some(dispatcher),
        })
    }

    /// Read the current status of a charger
    pub async fn get_charger_status(&self, charger_id: impl Into<ChargerId>) -> Result<ChargerStatus> {
        let record = self.request(charger_id.into(), RecordKind::Status).await?;
        match map_record(&record) {
            Some(ChargerReading::Status(status)) => Ok(status),
            _ => Err(ClientError::UnexpectedRecord { expected: RecordKind::Status, actual: record.kind() }),
        }
    }

    /// Read the detailed electrical metrics of a charger
    pub async fn get_charger_metrics(&self, charger_id: impl Into<ChargerId>) -> Result<ChargerMetrics> {
        let record = self.request(charger_id.into(), RecordKind::Metrics).await?;
        match map_record(&record) {
            Some(ChargerReading::Metrics(metrics)) => Ok(metrics),
            _ => Err(ClientError::UnexpectedRecord { expected: RecordKind::Metrics, actual: record.kind() }),
        }
    }

    /// Every frame received from now on, including ones nobody requested.
    pub fn subscribe(&self) -> broadcast::Receiver<ChargerEvent> {
        self.events.subscribe()
    }

    /// Number of requests waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Cancel outstanding requests, stop dispatching and close the transport.
    pub async fn disconnect(mut self) -> Result<()> {
        self.stop();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                warn!("Dispatcher task failed: {err}");
            }
        }
        self.transport.disconnect().await.map_err(ClientError::Transport)?;
        info!("Disconnected");
        Ok(())
    }

    async fn request(&self, charger_id: ChargerId, kind: RecordKind) -> Result<DecodedRecord> {
        let handle = self.table.register(charger_id.clone(), kind, self.config.request_timeout)?;

        let topic = self.topics.command_topic(&charger_id);
        let command = message::encode_request(kind);
        let h = hex::encode(&command);
        debug!(%charger_id, %kind, %topic, "TX: {h}");

        // On failure the handle is dropped here, which withdraws the entry.
        self.transport.publish(&topic, Bytes::from(command)).await.map_err(ClientError::Transport)?;

        handle.wait().await
    }

    fn stop(&mut self) {
        self.table.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl<T: Transport> Drop for ChargerClient<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::message::{DecodedRecord, FrameDecoder};
use crate::pending::PendingTable;
use crate::record_mapper::{map_record, ChargerReading};
use crate::transport::{BusMessage, InboundStream, TopicScheme};
use crate::ChargerId;

/// A frame received from a charger, whether or not anybody asked for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerEvent {
    pub charger_id: ChargerId,
    pub record: DecodedRecord,
    /// `None` for frames of a type the crate cannot present
    pub reading: Option<ChargerReading>,
}

/// The only reader of the inbound stream. Messages are handled one at a time in arrival order,
/// and a message that cannot be handled is logged and skipped.
pub(crate) struct Dispatcher {
    pub table: PendingTable,
    pub topics: Arc<dyn TopicScheme>,
    pub decoder: FrameDecoder,
    pub events: broadcast::Sender<ChargerEvent>,
    pub sweep_interval: Duration,
}

impl Dispatcher {
    /// Run until the stream ends or `shutdown` fires (or its sender is dropped). Either way every
    /// request still pending is cancelled on exit.
    pub async fn run(self, mut inbound: InboundStream, mut shutdown: oneshot::Receiver<()>) {
        let mut sweep = tokio::time::interval(self.sweep_interval.max(ClientConfig::MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = inbound.next() => match message {
                    Some(message) => {
                        self.handle(&message);
                    }
                    None => {
                        info!("Inbound stream ended");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.table.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "Swept expired requests");
                    }
                }
                _ = &mut shutdown => {
                    debug!("Dispatcher shutting down");
                    break;
                }
            }
        }

        let cancelled = self.table.close();
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending requests on disconnect");
        }
    }

    /// Process one inbound message. Returns whether it completed a pending request.
    pub fn handle(&self, message: &BusMessage) -> bool {
        let Some(charger_id) = self.topics.charger_id(&message.topic) else {
            debug!(topic = %message.topic, "Ignoring message on unrelated topic");
            return false;
        };

        trace!(%charger_id, "RX: {}", hex::encode(&message.payload));

        let record = match self.decoder.decode(&message.payload) {
            Ok(record) => record,
            Err(err) => {
                warn!(%charger_id, "Dropping malformed frame: {err}: {}", hex::encode(&message.payload));
                return false;
            }
        };

        let reading = map_record(&record);
        if reading.is_none() {
            debug!(%charger_id, kind = %record.kind(), "Frame of unknown type");
        }

        if self.events.receiver_count() > 0 {
            // Lagging or departed subscribers are not our concern.
            let _ = self.events.send(ChargerEvent { charger_id: charger_id.clone(), record: record.clone(), reading });
        }

        let kind = record.kind();
        let matched = self.table.resolve(&charger_id, record);
        if !matched {
            trace!(%charger_id, %kind, "No pending request for frame");
        }
        matched
    }
}

#[cfg(test)]
fn test_dispatcher() -> (Dispatcher, broadcast::Receiver<ChargerEvent>) {
    let (events, rx) = broadcast::channel(8);
    let dispatcher = Dispatcher {
        table: PendingTable::new(),
        topics: Arc::new(crate::transport::DefaultTopicScheme::new("u")),
        decoder: FrameDecoder::default(),
        events,
        sweep_interval: Duration::from_secs(1),
    };
    (dispatcher, rx)
}

#[cfg(test)]
const STATUS_FRAME: &str = "aa55160102020103000005dc000004d20001e24000050002";

#[tokio::test]
async fn test_handle_resolves_matching_request() {
    let (dispatcher, mut events) = test_dispatcher();
    let c1 = ChargerId::from("C1");
    let handle = dispatcher
        .table
        .register(c1.clone(), crate::message::RecordKind::Status, Duration::from_secs(5))
        .unwrap();

    let message = BusMessage::new("evmeter/u/C1/data", hex::decode(STATUS_FRAME).unwrap());
    assert!(dispatcher.handle(&message));
    assert!(handle.wait().await.is_ok());

    let event = events.recv().await.unwrap();
    assert_eq!(event.charger_id, c1);
    assert!(matches!(event.reading, Some(ChargerReading::Status(_))));
}

#[tokio::test]
async fn test_handle_isolates_bad_messages() {
    let (dispatcher, mut events) = test_dispatcher();
    let c2 = ChargerId::from("C2");
    let handle = dispatcher
        .table
        .register(c2.clone(), crate::message::RecordKind::Status, Duration::from_secs(5))
        .unwrap();

    // Unrelated topic, bad marker, truncated frame, unknown type, frame for another charger.
    assert!(!dispatcher.handle(&BusMessage::new("other/topic", hex::decode(STATUS_FRAME).unwrap())));
    assert!(!dispatcher.handle(&BusMessage::new("evmeter/u/C2/data", vec![0x00u8, 0x01, 0x02, 0x03])));
    assert!(!dispatcher.handle(&BusMessage::new("evmeter/u/C2/data", vec![0xAAu8, 0x55])));
    assert!(!dispatcher.handle(&BusMessage::new("evmeter/u/C2/data", hex::decode("aa5503ee00").unwrap())));
    assert!(!dispatcher.handle(&BusMessage::new("evmeter/u/C1/data", hex::decode(STATUS_FRAME).unwrap())));
    assert!(dispatcher.table.contains(&c2, crate::message::RecordKind::Status));

    assert!(dispatcher.handle(&BusMessage::new("evmeter/u/C2/data", hex::decode(STATUS_FRAME).unwrap())));
    assert!(handle.wait().await.is_ok());

    // Subscribers saw the unknown frame and both status frames, not the malformed ones.
    let unknown = events.recv().await.unwrap();
    assert_eq!(unknown.record.kind(), crate::message::RecordKind::Unknown(0xee));
    assert_eq!(unknown.reading, None);
    assert_eq!(events.recv().await.unwrap().charger_id, ChargerId::from("C1"));
    assert_eq!(events.recv().await.unwrap().charger_id, c2);
}

#[tokio::test(start_paused = true)]
async fn test_run_cancels_pending_when_stream_ends() {
    let (dispatcher, _events) = test_dispatcher();
    let table = dispatcher.table.clone();
    let handle = table.register(ChargerId::from("C1"), crate::message::RecordKind::Metrics, Duration::from_secs(30)).unwrap();

    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    let inbound: InboundStream = futures_util::stream::empty().boxed();
    dispatcher.run(inbound, shutdown_rx).await;

    assert!(table.is_empty());
    assert!(matches!(handle.wait().await, Err(crate::error::ClientError::TransportDisconnected)));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_expires_unpolled_request() {
    let (dispatcher, _events) = test_dispatcher();
    let table = dispatcher.table.clone();
    let handle = table.register(ChargerId::from("C1"), crate::message::RecordKind::Status, Duration::from_secs(2)).unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let inbound: InboundStream = futures_util::stream::pending().boxed();
    let task = tokio::spawn(dispatcher.run(inbound, shutdown_rx));

    // Nobody waits on the handle, so only the sweep can remove the entry.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(table.is_empty());
    assert!(matches!(
        handle.wait().await,
        Err(crate::error::ClientError::RequestTimeout { kind: crate::message::RecordKind::Status, .. })
    ));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

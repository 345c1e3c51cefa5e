//! The publish/subscribe connection the client talks through.
//!
//! The crate does not open network connections itself. An embedding application implements
//! [`Transport`] on top of its MQTT client (or anything else that moves `(topic, bytes)` pairs)
//! and hands it to [`crate::ChargerClient::connect`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Notify};

use crate::ChargerId;

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// Messages delivered to the client, in arrival order. The stream ending means the
/// connection is gone.
pub type InboundStream = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and subscribe to `topic_filter`.
    async fn connect(&self, topic_filter: &str) -> anyhow::Result<InboundStream>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self, topic_filter: &str) -> anyhow::Result<InboundStream> {
        (**self).connect(topic_filter).await
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        (**self).disconnect().await
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        (**self).publish(topic, payload).await
    }
}

/// Where commands go and where frames come from.
pub trait TopicScheme: Send + Sync {
    fn command_topic(&self, charger_id: &ChargerId) -> String;

    /// The filter subscribed to on connect.
    fn subscription_filter(&self) -> String;

    /// The charger a frame published on `topic` belongs to, if any.
    fn charger_id(&self, topic: &str) -> Option<ChargerId>;
}

/// `evmeter/{user_id}/{charger_id}/cmd` for commands and `evmeter/{user_id}/{charger_id}/data`
/// for frames.
#[derive(Debug, Clone)]
pub struct DefaultTopicScheme {
    user_id: String,
}

impl DefaultTopicScheme {
    const ROOT: &'static str = "evmeter";
    const COMMAND_LEAF: &'static str = "cmd";
    const DATA_LEAF: &'static str = "data";

    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }
}

impl TopicScheme for DefaultTopicScheme {
    fn command_topic(&self, charger_id: &ChargerId) -> String {
        format!("{}/{}/{}/{}", Self::ROOT, self.user_id, charger_id, Self::COMMAND_LEAF)
    }

    fn subscription_filter(&self) -> String {
        format!("{}/{}/+/{}", Self::ROOT, self.user_id, Self::DATA_LEAF)
    }

    fn charger_id(&self, topic: &str) -> Option<ChargerId> {
        let mut levels = topic.split('/');
        let root = levels.next()?;
        let user_id = levels.next()?;
        let charger_id = levels.next()?;
        let leaf = levels.next()?;
        if root != Self::ROOT
            || user_id != self.user_id
            || leaf != Self::DATA_LEAF
            || charger_id.is_empty()
            || levels.next().is_some()
        {
            return None;
        }
        Some(ChargerId::from(charger_id))
    }
}

/// A transport that lives entirely in process.
///
/// Whoever holds it plays the broker: [`MemoryTransport::inject`] delivers a message to the
/// connected client, [`MemoryTransport::published`] shows what the client sent.
#[derive(Default)]
pub struct MemoryTransport {
    inbound: Mutex<Option<mpsc::UnboundedSender<BusMessage>>>,
    published: Mutex<Vec<BusMessage>>,
    published_notify: Notify,
    subscriptions: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message to the client. Returns false when nothing is connected.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Bytes>) -> bool {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        match inbound.as_ref() {
            Some(tx) => tx.send(BusMessage::new(topic, payload)).is_ok(),
            None => false,
        }
    }

    /// End the inbound stream as if the broker had dropped the connection.
    pub fn drop_connection(&self) {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_connected(&self) -> bool {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until at least `count` messages have been published, then return them all.
    pub async fn wait_for_published(&self, count: usize) -> Vec<BusMessage> {
        loop {
            let notified = self.published_notify.notified();
            let published = self.published();
            if published.len() >= count {
                return published;
            }
            notified.await;
        }
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make subsequent publishes fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, topic_filter: &str) -> anyhow::Result<InboundStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).push(topic_filter.to_string());

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            let message = rx.recv().await?;
            Some((message, rx))
        });
        Ok(stream.boxed())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.drop_connection();
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(anyhow!("publish to {topic} rejected"));
        }
        if !self.is_connected() {
            return Err(anyhow!("not connected"));
        }
        self.published.lock().unwrap_or_else(PoisonError::into_inner).push(BusMessage::new(topic, payload));
        self.published_notify.notify_waiters();
        Ok(())
    }
}

#[test]
fn test_default_topic_scheme() {
    let scheme = DefaultTopicScheme::new("a1b2");
    let charger = ChargerId::from("0434335121105646");

    assert_eq!(scheme.command_topic(&charger), "evmeter/a1b2/0434335121105646/cmd");
    assert_eq!(scheme.subscription_filter(), "evmeter/a1b2/+/data");
    assert_eq!(scheme.charger_id("evmeter/a1b2/0434335121105646/data"), Some(charger));

    assert_eq!(scheme.charger_id("evmeter/other/0434335121105646/data"), None);
    assert_eq!(scheme.charger_id("evmeter/a1b2/0434335121105646/cmd"), None);
    assert_eq!(scheme.charger_id("evmeter/a1b2//data"), None);
    assert_eq!(scheme.charger_id("evmeter/a1b2/C1/data/extra"), None);
    assert_eq!(scheme.charger_id("evmeter/a1b2"), None);
}

#[tokio::test]
async fn test_memory_transport_round_trip() {
    let transport = MemoryTransport::new();
    assert!(!transport.inject("t", vec![1u8]));

    let mut inbound = transport.connect("evmeter/u/+/data").await.unwrap();
    assert_eq!(transport.subscriptions(), vec!["evmeter/u/+/data".to_string()]);
    assert!(transport.inject("t", vec![1u8, 2]));
    assert_eq!(inbound.next().await, Some(BusMessage::new("t", vec![1u8, 2])));

    transport.publish("cmd", Bytes::from_static(&[0xAA])).await.unwrap();
    assert_eq!(transport.wait_for_published(1).await, vec![BusMessage::new("cmd", vec![0xAAu8])]);

    transport.set_fail_publish(true);
    assert!(transport.publish("cmd", Bytes::new()).await.is_err());

    transport.disconnect().await.unwrap();
    assert_eq!(inbound.next().await, None);
}

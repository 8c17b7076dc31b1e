//! Publish/subscribe transport seam and its in-process implementation.
//!
//! The bridge only talks to the outside world through [`Transport`].
//! [`BusTransport`] is the headless implementation used by the CLI and by
//! tests: every topic is a single-slot [`tokio::sync::watch`] channel, so a
//! publish overwrites the previous message and never blocks, and subscribers
//! always see the most recent value.  A global [`broadcast`] tap mirrors every
//! published [`Envelope`] for observers such as the rosbridge server.
//!
//! # Topic typing
//!
//! A topic's [`WireType`] is fixed by whoever touches it first (advertise or
//! subscribe).  Later advertisers or subscribers asking for a different type
//! are rejected with [`TransportError::TypeMismatch`].  A topic with no
//! publisher and no subscriber left is forgotten, type included.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use dgbridge_types::{BridgeError, WireMessage, WireType};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of the envelope tap (messages buffered for slow observers).
const DEFAULT_TAP_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("topic '{topic}' carries {existing}, not {requested}")]
    TypeMismatch {
        topic: String,
        existing: WireType,
        requested: WireType,
    },

    #[error("topic '{topic}' expects {expected} messages, got {found}")]
    MessageMismatch {
        topic: String,
        expected: WireType,
        found: WireType,
    },

    #[error("unknown publisher handle {0}")]
    UnknownHandle(Uuid),

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        BridgeError::TransportUnavailable(err.to_string())
    }
}

/// Proof of a successful advertise.  Required to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherHandle {
    id: Uuid,
    topic: String,
    wire_type: WireType,
}

impl PublisherHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }
}

/// A message as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub msg: WireMessage,
}

impl Envelope {
    fn new(topic: &str, msg: WireMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.to_string(),
            msg,
        }
    }
}

impl AsRef<WireMessage> for Envelope {
    fn as_ref(&self) -> &WireMessage {
        &self.msg
    }
}

/// External publish/subscribe service.
pub trait Transport: Send + Sync {
    /// Declare `topic` as carrying `wire_type` and obtain a publisher on it.
    fn advertise(&self, topic: &str, wire_type: WireType)
    -> Result<PublisherHandle, TransportError>;

    /// Hand `msg` to the transport.  Single-slot and non-blocking: a message
    /// not yet seen by a subscriber is overwritten by the next one.
    fn publish(&self, handle: &PublisherHandle, msg: WireMessage) -> Result<(), TransportError>;

    /// Release a publisher.
    fn unadvertise(&self, handle: &PublisherHandle) -> Result<(), TransportError>;

    /// Listen on `topic`, which must carry `wire_type`.
    fn subscribe(&self, topic: &str, wire_type: WireType) -> Result<Subscription, TransportError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Subscription
// ────────────────────────────────────────────────────────────────────────────

/// Receiving side of a topic.  Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    wire_type: WireType,
    receiver: watch::Receiver<Option<Arc<Envelope>>>,
    topics: Weak<Mutex<Topics>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// The newest envelope not yet taken, without waiting.
    ///
    /// Returns `None` when nothing new arrived since the last call or when
    /// the topic was torn down.
    pub fn take_latest(&mut self) -> Option<Arc<Envelope>> {
        match self.receiver.has_changed() {
            Ok(true) => self.receiver.borrow_and_update().clone(),
            Ok(false) | Err(_) => None,
        }
    }

    /// Wait for the next envelope.
    ///
    /// Returns `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(envelope) = self.receiver.borrow_and_update().clone() {
                return Some(envelope);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.lock().unwrap_or_else(PoisonError::into_inner);
        // Our own receiver is still alive here.
        BusTransport::forget_if_idle(&mut topics, &self.topic, 1);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BusTransport
// ────────────────────────────────────────────────────────────────────────────

type Topics = BTreeMap<String, TopicSlot>;

struct TopicSlot {
    wire_type: WireType,
    sender: watch::Sender<Option<Arc<Envelope>>>,
    publishers: HashSet<Uuid>,
}

impl TopicSlot {
    fn new(wire_type: WireType) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            wire_type,
            sender,
            publishers: HashSet::new(),
        }
    }
}

/// In-process transport.  Clone it cheaply – all clones share the same
/// topics.
#[derive(Clone)]
pub struct BusTransport {
    topics: Arc<Mutex<Topics>>,
    tap: broadcast::Sender<Arc<Envelope>>,
    closed: Arc<AtomicBool>,
}

impl BusTransport {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(DEFAULT_TAP_CAPACITY);
        Self {
            topics: Arc::new(Mutex::new(BTreeMap::new())),
            tap,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Observe every envelope that goes through the bus.
    pub fn tap(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.tap.subscribe()
    }

    /// Publish on `topic` on behalf of an external producer.
    ///
    /// The topic must already be known and carry `msg`'s wire type.
    pub fn inject(&self, topic: &str, msg: WireMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        let topics = self.lock();
        let slot = topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        self.deliver(topic, slot, msg)
    }

    /// Wire type of a known topic.
    pub fn wire_type_of(&self, topic: &str) -> Option<WireType> {
        self.lock().get(topic).map(|slot| slot.wire_type)
    }

    /// Known topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Make every operation fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `topic` once nobody publishes on it and at most `own_receivers`
    /// receivers (held by the caller) remain.
    fn forget_if_idle(topics: &mut Topics, topic: &str, own_receivers: usize) {
        let idle = topics.get(topic).is_some_and(|slot| {
            slot.publishers.is_empty() && slot.sender.receiver_count() <= own_receivers
        });
        if idle {
            topics.remove(topic);
            debug!(topic, "topic released");
        }
    }

    fn slot_for<'a>(
        topics: &'a mut Topics,
        topic: &str,
        wire_type: WireType,
    ) -> Result<&'a mut TopicSlot, TransportError> {
        let slot = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicSlot::new(wire_type));
        if slot.wire_type != wire_type {
            return Err(TransportError::TypeMismatch {
                topic: topic.to_string(),
                existing: slot.wire_type,
                requested: wire_type,
            });
        }
        Ok(slot)
    }

    fn deliver(&self, topic: &str, slot: &TopicSlot, msg: WireMessage) -> Result<(), TransportError> {
        if msg.wire_type() != slot.wire_type {
            return Err(TransportError::MessageMismatch {
                topic: topic.to_string(),
                expected: slot.wire_type,
                found: msg.wire_type(),
            });
        }
        let envelope = Arc::new(Envelope::new(topic, msg));
        slot.sender.send_replace(Some(Arc::clone(&envelope)));
        // No observers is a normal condition.
        let _ = self.tap.send(envelope);
        Ok(())
    }
}

impl Default for BusTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BusTransport {
    fn advertise(
        &self,
        topic: &str,
        wire_type: WireType,
    ) -> Result<PublisherHandle, TransportError> {
        self.ensure_open()?;
        let mut topics = self.lock();
        let slot = Self::slot_for(&mut topics, topic, wire_type)?;
        let id = Uuid::new_v4();
        slot.publishers.insert(id);
        debug!(topic, %wire_type, publisher = %id, "topic advertised");
        Ok(PublisherHandle {
            id,
            topic: topic.to_string(),
            wire_type,
        })
    }

    fn publish(&self, handle: &PublisherHandle, msg: WireMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        let topics = self.lock();
        let slot = topics
            .get(&handle.topic)
            .filter(|slot| slot.publishers.contains(&handle.id))
            .ok_or(TransportError::UnknownHandle(handle.id))?;
        self.deliver(&handle.topic, slot, msg)
    }

    fn unadvertise(&self, handle: &PublisherHandle) -> Result<(), TransportError> {
        let mut topics = self.lock();
        let removed = topics
            .get_mut(&handle.topic)
            .is_some_and(|slot| slot.publishers.remove(&handle.id));
        if !removed {
            warn!(topic = %handle.topic, publisher = %handle.id, "unadvertise of unknown publisher");
            return Err(TransportError::UnknownHandle(handle.id));
        }
        debug!(topic = %handle.topic, publisher = %handle.id, "topic unadvertised");
        Self::forget_if_idle(&mut topics, &handle.topic, 0);
        Ok(())
    }

    fn subscribe(&self, topic: &str, wire_type: WireType) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        let mut topics = self.lock();
        let slot = Self::slot_for(&mut topics, topic, wire_type)?;
        Ok(Subscription {
            topic: topic.to_string(),
            wire_type,
            receiver: slot.sender.subscribe(),
            topics: Arc::downgrade(&self.topics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgbridge_types::{Float64Msg, UInt32Msg};

    fn scalar(data: f64) -> WireMessage {
        WireMessage::Float64(Float64Msg { data })
    }

    #[test]
    fn subscriber_sees_only_the_latest_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/time", WireType::Float64)?;
        let mut sub = bus.subscribe("/time", WireType::Float64)?;

        assert!(sub.take_latest().is_none());

        bus.publish(&handle, scalar(1.0))?;
        bus.publish(&handle, scalar(2.0))?;

        let envelope = sub.take_latest().ok_or("nothing received")?;
        assert_eq!(envelope.msg, scalar(2.0));
        assert_eq!(envelope.topic, "/time");
        // Already taken.
        assert!(sub.take_latest().is_none());
        Ok(())
    }

    #[test]
    fn publishing_without_subscribers_succeeds() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/lonely", WireType::Float64)?;
        bus.publish(&handle, scalar(0.5))?;
        Ok(())
    }

    #[test]
    fn topic_type_is_fixed_by_first_use() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let _sub = bus.subscribe("/count", WireType::UInt32)?;
        let err = bus.advertise("/count", WireType::Float64).unwrap_err();
        assert!(matches!(err, TransportError::TypeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn publish_rejects_wrong_message_type() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/count", WireType::UInt32)?;
        let err = bus.publish(&handle, scalar(1.0)).unwrap_err();
        assert!(matches!(err, TransportError::MessageMismatch { .. }));
        bus.publish(&handle, WireMessage::UInt32(UInt32Msg { data: 3 }))?;
        Ok(())
    }

    #[test]
    fn unadvertised_handle_can_no_longer_publish() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/x", WireType::Float64)?;
        bus.unadvertise(&handle)?;
        assert_eq!(
            bus.publish(&handle, scalar(1.0)),
            Err(TransportError::UnknownHandle(handle.id()))
        );
        assert!(bus.unadvertise(&handle).is_err());
        Ok(())
    }

    #[test]
    fn closed_bus_refuses_traffic_until_reopened() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/x", WireType::Float64)?;
        bus.close();
        assert_eq!(bus.publish(&handle, scalar(1.0)), Err(TransportError::Closed));
        bus.reopen();
        bus.publish(&handle, scalar(1.0))?;
        Ok(())
    }

    #[test]
    fn transport_error_becomes_transport_unavailable() {
        let err: BridgeError = TransportError::Closed.into();
        assert!(matches!(err, BridgeError::TransportUnavailable(_)));
    }

    #[test]
    fn inject_requires_a_known_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        assert!(matches!(
            bus.inject("/nowhere", scalar(1.0)),
            Err(TransportError::UnknownTopic(_))
        ));
        let mut sub = bus.subscribe("/cmd", WireType::Float64)?;
        bus.inject("/cmd", scalar(4.0))?;
        assert_eq!(sub.take_latest().ok_or("nothing received")?.msg, scalar(4.0));
        assert_eq!(bus.wire_type_of("/cmd"), Some(WireType::Float64));
        assert_eq!(bus.topics(), vec!["/cmd"]);
        Ok(())
    }

    #[test]
    fn last_publisher_gone_releases_the_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let first = bus.advertise("/x", WireType::Float64)?;
        let second = bus.advertise("/x", WireType::Float64)?;
        bus.unadvertise(&first)?;
        assert_eq!(bus.wire_type_of("/x"), Some(WireType::Float64));

        bus.unadvertise(&second)?;
        assert!(bus.topics().is_empty());
        bus.advertise("/x", WireType::UInt32)?;
        Ok(())
    }

    #[test]
    fn subscribed_topic_outlives_its_publishers() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/x", WireType::Float64)?;
        let sub = bus.subscribe("/x", WireType::Float64)?;
        bus.unadvertise(&handle)?;
        assert_eq!(bus.topics(), vec!["/x"]);

        drop(sub);
        assert!(bus.topics().is_empty());
        Ok(())
    }

    #[test]
    fn dropping_one_of_two_subscriptions_keeps_the_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let first = bus.subscribe("/x", WireType::Float64)?;
        let _second = bus.subscribe("/x", WireType::Float64)?;
        drop(first);
        assert_eq!(bus.wire_type_of("/x"), Some(WireType::Float64));
        Ok(())
    }

    #[tokio::test]
    async fn tap_mirrors_every_envelope() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let mut tap = bus.tap();
        let handle = bus.advertise("/a", WireType::Float64)?;
        bus.publish(&handle, scalar(1.0))?;
        bus.publish(&handle, scalar(2.0))?;

        assert_eq!(tap.recv().await?.msg, scalar(1.0));
        assert_eq!(tap.recv().await?.msg, scalar(2.0));
        Ok(())
    }

    #[tokio::test]
    async fn recv_waits_for_the_next_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = BusTransport::new();
        let handle = bus.advertise("/a", WireType::Float64)?;
        let mut sub = bus.subscribe("/a", WireType::Float64)?;

        let publisher = bus.clone();
        tokio::spawn(async move {
            let _ = publisher.publish(&handle, scalar(9.0));
        });

        let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await?
            .ok_or("topic closed")?;
        assert_eq!(envelope.msg, scalar(9.0));
        Ok(())
    }
}

//! Message bus boundary and an in-process implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError, TryRecvError};
use parking_lot::RwLock;
use spike_bridge_core::BusValue;
use tracing::debug;

use crate::error::TransportError;

/// Per-subscriber buffer on the in-process bus. Publishing into a full buffer
/// drops the value instead of blocking the publisher.
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Where inbound values come from and outbound values go.
pub trait MessageBus: Send + Sync {
    /// Open a subscription. May fail while the bus is unreachable.
    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    fn publish(&self, topic: &str, value: &BusValue) -> Result<(), TransportError>;
}

/// Receiving end of one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: Receiver<BusValue>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: Receiver<BusValue>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<Option<BusValue>, TransportError> {
        match self.receiver.try_recv() {
            Ok(v) => Ok(Some(v)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(TransportError::Disconnected(self.topic.clone()))
            }
        }
    }

    /// Drain everything queued and keep only the newest value.
    pub fn drain_latest(&self) -> Result<Option<BusValue>, TransportError> {
        let mut latest = None;
        loop {
            match self.try_recv() {
                Ok(Some(v)) => latest = Some(v),
                Ok(None) => return Ok(latest),
                // Still hand out what arrived before the disconnect.
                Err(e) if latest.is_none() => return Err(e),
                Err(_) => return Ok(latest),
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<BusValue>, TransportError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(v) => Ok(Some(v)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected(self.topic.clone()))
            }
        }
    }
}

/// Topic table shared by the bus implementations: one bounded channel per
/// subscriber, values copied to each.
#[derive(Debug, Default)]
pub(crate) struct Fanout {
    topics: RwLock<HashMap<String, Vec<Sender<BusValue>>>>,
}

impl Fanout {
    pub(crate) fn subscribe(&self, topic: &str) -> Subscription {
        debug!("Creating subscriber for topic: {}", topic);
        let (sender, receiver) = channel::bounded(SUBSCRIPTION_CAPACITY);
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        Subscription::new(topic, receiver)
    }

    /// Copy `value` to every live subscriber of `topic`, pruning dropped ones.
    pub(crate) fn deliver(&self, topic: &str, value: &BusValue) {
        if let Some(senders) = self.topics.write().get_mut(topic) {
            senders.retain(|s| match s.try_send(value.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }

    pub(crate) fn clear(&self) {
        self.topics.write().clear();
    }

    pub(crate) fn subscribers(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}

/// In-process bus: publishing on a topic reaches every subscriber of it.
#[derive(Debug)]
pub struct LocalBus {
    fanout: Fanout,
    published: RwLock<HashMap<String, u64>>,
    online: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            fanout: Fanout::default(),
            published: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Take the bus down or bring it back. Going down disconnects every
    /// existing subscription.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.fanout.clear();
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of successful publishes on `topic`.
    pub fn published(&self, topic: &str) -> u64 {
        self.published.read().get(topic).copied().unwrap_or(0)
    }

    pub fn subscribers(&self, topic: &str) -> usize {
        self.fanout.subscribers(topic)
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransportError::Unreachable("local bus is offline".to_string()))
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for LocalBus {
    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        self.check_online()?;
        Ok(self.fanout.subscribe(topic))
    }

    fn publish(&self, topic: &str, value: &BusValue) -> Result<(), TransportError> {
        self.check_online()?;
        self.fanout.deliver(topic, value);
        *self.published.write().entry(topic.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let bus = LocalBus::new();
        let a = bus.subscribe("t").unwrap();
        let b = bus.subscribe("t").unwrap();
        bus.publish("t", &BusValue::Scalar(1.0)).unwrap();
        assert_eq!(a.try_recv().unwrap(), Some(BusValue::Scalar(1.0)));
        assert_eq!(b.try_recv().unwrap(), Some(BusValue::Scalar(1.0)));
        assert_eq!(a.try_recv().unwrap(), None);
        assert_eq!(bus.published("t"), 1);
    }

    #[test]
    fn topics_do_not_cross_talk() {
        let bus = LocalBus::new();
        let a = bus.subscribe("a").unwrap();
        bus.publish("b", &BusValue::Scalar(1.0)).unwrap();
        assert_eq!(a.try_recv().unwrap(), None);
    }

    #[test]
    fn drain_keeps_newest() {
        let bus = LocalBus::new();
        let s = bus.subscribe("t").unwrap();
        for i in 0..5 {
            bus.publish("t", &BusValue::Scalar(i as f64)).unwrap();
        }
        assert_eq!(s.drain_latest().unwrap(), Some(BusValue::Scalar(4.0)));
        assert_eq!(s.drain_latest().unwrap(), None);
    }

    #[test]
    fn offline_bus_refuses_and_disconnects() {
        let bus = LocalBus::new();
        let s = bus.subscribe("t").unwrap();
        bus.set_online(false);
        assert!(matches!(bus.subscribe("t"), Err(TransportError::Unreachable(_))));
        assert!(bus.publish("t", &BusValue::Scalar(0.0)).is_err());
        assert!(matches!(s.try_recv(), Err(TransportError::Disconnected(_))));
        bus.set_online(true);
        assert!(bus.subscribe("t").is_ok());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = LocalBus::new();
        let s = bus.subscribe("t").unwrap();
        assert_eq!(bus.subscribers("t"), 1);
        drop(s);
        bus.publish("t", &BusValue::Scalar(0.0)).unwrap();
        assert_eq!(bus.subscribers("t"), 0);
    }
}

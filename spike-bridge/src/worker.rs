//! Bus pump: the per-tick body of an interface's background worker.
//!
//! Inbound values are drained into the source slot; the sink slot is
//! published every `publish_every` ticks. Transport failures are retried on
//! the next tick and never reach the engines.

use std::sync::Arc;
use std::time::Instant;

use spike_bridge_core::BusValue;
use tracing::{debug, info, warn};

use crate::bench::TimingRecorder;
use crate::bus::{MessageBus, Subscription};
use crate::error::TransportError;
use crate::slot::Slot;

/// Logs the first failure of a streak at `warn`, the rest at `debug`.
#[derive(Debug, Default)]
pub(crate) struct RetryLog {
    failures: u64,
}

impl RetryLog {
    pub(crate) fn failed(&mut self, what: &str, err: &TransportError) {
        if self.failures == 0 {
            warn!(error = %err, "{what} failed, retrying on worker clock");
        } else {
            debug!(error = %err, attempt = self.failures + 1, "{what} still failing");
        }
        self.failures += 1;
    }

    pub(crate) fn succeeded(&mut self, what: &str) {
        if self.failures > 0 {
            info!(after = self.failures, "{what} recovered");
            self.failures = 0;
        }
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures
    }
}

struct Inbound {
    topic: String,
    slot: Arc<Slot<BusValue>>,
    subscription: Option<Subscription>,
    retry: RetryLog,
}

struct Outbound {
    topic: String,
    slot: Arc<Slot<BusValue>>,
    every: u64,
    retry: RetryLog,
}

pub struct BusPump {
    bus: Arc<dyn MessageBus>,
    inbound: Option<Inbound>,
    outbound: Option<Outbound>,
    timings: Option<Arc<TimingRecorder>>,
}

impl BusPump {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            inbound: None,
            outbound: None,
            timings: None,
        }
    }

    /// Feed values arriving on `topic` into `slot`.
    pub fn inbound(mut self, topic: impl Into<String>, slot: Arc<Slot<BusValue>>) -> Self {
        self.inbound = Some(Inbound {
            topic: topic.into(),
            slot,
            subscription: None,
            retry: RetryLog::default(),
        });
        self
    }

    /// Publish the content of `slot` on `topic` every `every` ticks.
    pub fn outbound(
        mut self,
        topic: impl Into<String>,
        slot: Arc<Slot<BusValue>>,
        every: u64,
    ) -> Self {
        self.outbound = Some(Outbound {
            topic: topic.into(),
            slot,
            every: every.max(1),
            retry: RetryLog::default(),
        });
        self
    }

    pub fn timed(mut self, timings: Arc<TimingRecorder>) -> Self {
        self.timings = Some(timings);
        self
    }

    /// One worker iteration; `n` is the tick index since the run started.
    pub fn tick(&mut self, n: u64) {
        let started = Instant::now();
        if let Some(inbound) = &mut self.inbound {
            pump_inbound(self.bus.as_ref(), inbound);
        }
        if let Some(outbound) = &mut self.outbound {
            if n % outbound.every == 0 {
                pump_outbound(self.bus.as_ref(), outbound);
            }
        }
        if let Some(t) = &self.timings {
            t.record(started.elapsed());
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inbound.as_ref().is_some_and(|i| i.subscription.is_some())
    }
}

fn pump_inbound(bus: &dyn MessageBus, inbound: &mut Inbound) {
    if inbound.subscription.is_none() {
        match bus.subscribe(&inbound.topic) {
            Ok(sub) => {
                inbound.retry.succeeded("subscribe");
                debug!(topic = %inbound.topic, "subscribed");
                inbound.subscription = Some(sub);
            }
            Err(e) => {
                inbound.retry.failed("subscribe", &e);
                return;
            }
        }
    }

    let Some(sub) = &inbound.subscription else {
        return;
    };
    match sub.drain_latest() {
        Ok(Some(value)) => inbound.slot.write(value),
        Ok(None) => {}
        Err(e) => {
            inbound.retry.failed("subscription", &e);
            inbound.subscription = None;
        }
    }
}

fn pump_outbound(bus: &dyn MessageBus, outbound: &mut Outbound) {
    let Some(value) = outbound.slot.latest() else {
        return;
    };
    match bus.publish(&outbound.topic, &value) {
        Ok(()) => outbound.retry.succeeded("publish"),
        Err(e) => outbound.retry.failed("publish", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;

    #[test]
    fn inbound_values_reach_slot() {
        let bus = Arc::new(LocalBus::new());
        let slot = Arc::new(Slot::new());
        let mut pump = BusPump::new(bus.clone()).inbound("in", slot.clone());

        pump.tick(0);
        assert!(pump.is_subscribed());
        assert!(slot.is_empty());

        bus.publish("in", &BusValue::Scalar(1.0)).unwrap();
        bus.publish("in", &BusValue::Scalar(2.0)).unwrap();
        pump.tick(1);
        assert_eq!(slot.latest(), Some(BusValue::Scalar(2.0)));

        // Nothing new: slot keeps the last value.
        pump.tick(2);
        assert_eq!(slot.latest(), Some(BusValue::Scalar(2.0)));
    }

    #[test]
    fn outbound_published_at_output_rate() {
        let bus = Arc::new(LocalBus::new());
        let slot = Arc::new(Slot::new());
        let mut pump = BusPump::new(bus.clone()).outbound("out", slot.clone(), 10);

        pump.tick(0);
        assert_eq!(bus.published("out"), 0, "empty slot is not published");

        slot.write(BusValue::Scalar(4.0));
        for n in 1..=30 {
            pump.tick(n);
        }
        assert_eq!(bus.published("out"), 3);
    }

    #[test]
    fn bus_outage_is_retried() {
        let bus = Arc::new(LocalBus::new());
        bus.set_online(false);
        let slot = Arc::new(Slot::new());
        let mut pump = BusPump::new(bus.clone()).inbound("in", slot.clone());

        for n in 0..3 {
            pump.tick(n);
        }
        assert!(!pump.is_subscribed());

        bus.set_online(true);
        pump.tick(3);
        assert!(pump.is_subscribed());
        bus.publish("in", &BusValue::Scalar(9.0)).unwrap();
        pump.tick(4);
        assert_eq!(slot.latest(), Some(BusValue::Scalar(9.0)));

        // Going down again drops the subscription; it comes back afterwards.
        bus.set_online(false);
        pump.tick(5);
        assert!(!pump.is_subscribed());
        bus.set_online(true);
        pump.tick(6);
        assert!(pump.is_subscribed());
    }

    #[test]
    fn retry_log_counts_streaks() {
        let mut log = RetryLog::default();
        let err = TransportError::Unreachable("x".into());
        log.failed("publish", &err);
        log.failed("publish", &err);
        assert_eq!(log.failures(), 2);
        log.succeeded("publish");
        assert_eq!(log.failures(), 0);
    }

    #[test]
    fn timings_record_each_tick() {
        let bus = Arc::new(LocalBus::new());
        let rec = Arc::new(TimingRecorder::new("pump").unwrap());
        let mut pump = BusPump::new(bus).timed(rec.clone());
        for n in 0..4 {
            pump.tick(n);
        }
        assert_eq!(rec.report().count, 4);
    }
}

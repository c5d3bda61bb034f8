//! Encode path: answers the substrate's "when does this neuron spike next".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use spike_bridge_core::{BusValue, Interval, SourcePolicy};
use tracing::{trace, warn};

use crate::slot::Slot;

/// Runs on the substrate's callback thread. Never blocks beyond its own
/// short-lived locks; a failing policy yields an absent interval.
pub struct SourceEngine {
    n_neurons: usize,
    policy: Mutex<Box<dyn SourcePolicy>>,
    inbound: Arc<Slot<BusValue>>,
    recorded: Option<Mutex<Vec<(u32, f64)>>>,
    faults: AtomicU64,
}

impl SourceEngine {
    pub fn new(
        n_neurons: usize,
        policy: Box<dyn SourcePolicy>,
        inbound: Arc<Slot<BusValue>>,
    ) -> Self {
        Self {
            n_neurons,
            policy: Mutex::new(policy),
            inbound,
            recorded: None,
            faults: AtomicU64::new(0),
        }
    }

    /// Keep every `(neuron, interval)` answer for later inspection.
    pub fn with_recording(mut self) -> Self {
        self.recorded = Some(Mutex::new(Vec::new()));
        self
    }

    /// Next inter-spike interval for `neuron`, straight from the policy.
    /// `None` tells the caller to ask again later.
    pub fn request_interval(&self, neuron: usize) -> Interval {
        let value = self.inbound.latest();
        let outcome = self
            .policy
            .lock()
            .next_interval(value.as_ref(), neuron, self.n_neurons);

        match outcome {
            Ok(interval) => {
                trace!(neuron, ?interval, "interval");
                if let (Some(rec), Some(ms)) = (&self.recorded, interval) {
                    rec.lock().push((neuron as u32, ms));
                }
                interval
            }
            Err(e) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                warn!(neuron, error = %e, "source policy fault, no spike scheduled");
                None
            }
        }
    }

    /// Clear per-run policy state and recordings.
    pub fn reset(&self) {
        self.policy.lock().reset(self.n_neurons);
        if let Some(rec) = &self.recorded {
            rec.lock().clear();
        }
    }

    pub fn n_neurons(&self) -> usize {
        self.n_neurons
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.lock().name()
    }

    pub fn inbound(&self) -> &Arc<Slot<BusValue>> {
        &self.inbound
    }

    /// Policy faults swallowed so far.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn recorded_intervals(&self) -> Vec<(u32, f64)> {
        self.recorded.as_ref().map(|r| r.lock().clone()).unwrap_or_default()
    }
}

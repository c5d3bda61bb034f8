//! Decode path: accumulates spikes and turns them into an output value.
//!
//! Two entry points run on different threads: `on_spike_event` on the
//! substrate's notification thread, `on_tick` on the sink clock. Both write
//! the current output under its own mutex and forward it to the outbound slot
//! while still holding it, so the slot always sees the newest output. Lock
//! order is policy, then neurons, then output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use spike_bridge_core::neuron::population;
use spike_bridge_core::{BusValue, Neuron, SinkPolicy};
use tracing::{trace, warn};

use crate::slot::Slot;

pub struct SinkEngine {
    n_neurons: usize,
    calling_rate: u32,
    policy: Mutex<Box<dyn SinkPolicy>>,
    neurons: Mutex<Vec<Neuron>>,
    output: Mutex<BusValue>,
    outbound: Arc<Slot<BusValue>>,
    recorded: Option<Mutex<Vec<(u64, BusValue)>>>,
    faults: AtomicU64,
}

impl SinkEngine {
    pub fn new(
        n_neurons: usize,
        policy: Box<dyn SinkPolicy>,
        outbound: Arc<Slot<BusValue>>,
    ) -> Self {
        let calling_rate = policy.calling_rate().max(1);
        let initial = policy.initial_output(n_neurons);
        Self {
            n_neurons,
            calling_rate,
            policy: Mutex::new(policy),
            neurons: Mutex::new(population(n_neurons)),
            output: Mutex::new(initial),
            outbound,
            recorded: None,
            faults: AtomicU64::new(0),
        }
    }

    /// Keep every `(time, value)` the policy produced.
    pub fn with_recording(mut self) -> Self {
        self.recorded = Some(Mutex::new(Vec::new()));
        self
    }

    /// One observed spike of `neuron_id` at `spike_time` (ms since run start).
    pub fn on_spike_event(&self, spike_time: u64, neuron_id: u32) {
        let idx = neuron_id as usize;
        if idx >= self.n_neurons {
            self.faults.fetch_add(1, Ordering::Relaxed);
            warn!(neuron_id, n_neurons = self.n_neurons, "spike from unknown neuron dropped");
            return;
        }
        self.neurons.lock()[idx].record_spike(spike_time);

        let mut policy = self.policy.lock();
        let mut output = self.output.lock();
        match policy.on_spike(spike_time, neuron_id, &output) {
            Ok(next) => {
                trace!(neuron_id, spike_time, "spike");
                self.commit(&mut output, next, spike_time);
            }
            Err(e) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    neuron_id,
                    spike_time,
                    error = %e,
                    "sink policy fault on spike, output unchanged"
                );
            }
        }
    }

    /// Periodic update at `sim_time` (ms since run start).
    pub fn on_tick(&self, sim_time: u64) {
        let mut policy = self.policy.lock();
        let neurons = self.neurons.lock();
        let mut output = self.output.lock();
        match policy.on_tick(&neurons, sim_time, &output) {
            Ok(next) => self.commit(&mut output, next, sim_time),
            Err(e) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                warn!(sim_time, error = %e, "sink policy fault on tick, output unchanged");
            }
        }
    }

    fn commit(&self, output: &mut BusValue, next: BusValue, time: u64) {
        if let Some(rec) = &self.recorded {
            rec.lock().push((time, next.clone()));
        }
        self.outbound.write(next.clone());
        *output = next;
    }

    /// Start a new run: fresh histories, fresh policy state, initial output.
    pub fn reset(&self) {
        let mut policy = self.policy.lock();
        policy.reset(self.n_neurons);
        *self.neurons.lock() = population(self.n_neurons);
        let initial = policy.initial_output(self.n_neurons);
        let mut output = self.output.lock();
        self.outbound.write(initial.clone());
        *output = initial;
        if let Some(rec) = &self.recorded {
            rec.lock().clear();
        }
    }

    /// Base ticks (ms) between two `on_tick` calls.
    pub fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    pub fn n_neurons(&self) -> usize {
        self.n_neurons
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.lock().name()
    }

    pub fn current_output(&self) -> BusValue {
        self.output.lock().clone()
    }

    pub fn outbound(&self) -> &Arc<Slot<BusValue>> {
        &self.outbound
    }

    /// Copy of one neuron's spike history.
    pub fn spike_times(&self, neuron: usize) -> Option<Vec<u64>> {
        self.neurons.lock().get(neuron).map(|n| n.spike_times().to_vec())
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn recorded_outputs(&self) -> Vec<(u64, BusValue)> {
        self.recorded.as_ref().map(|r| r.lock().clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use spike_bridge_core::{Smoothing, SmoothingMulti, SpikesPerWindow};
    use std::thread;

    fn smoothing_engine(n: usize) -> (SinkEngine, Arc<Slot<BusValue>>) {
        let slot = Arc::new(Slot::new());
        (SinkEngine::new(n, Box::new(Smoothing::default()), slot.clone()), slot)
    }

    #[test]
    fn spike_then_tick_updates_output_and_slot() {
        let (e, slot) = smoothing_engine(1);
        assert_eq!(e.calling_rate(), 10);
        e.on_spike_event(3, 0);
        assert_eq!(slot.latest(), Some(BusValue::Scalar(1.0)));
        e.on_tick(10);
        assert_relative_eq!(e.current_output().as_scalar().unwrap(), 0.95);
        assert_eq!(slot.latest(), Some(e.current_output()));
        assert_eq!(e.spike_times(0), Some(vec![3]));
    }

    #[test]
    fn decay_without_spikes_is_geometric() {
        let (e, _) = smoothing_engine(1);
        e.on_spike_event(0, 0);
        e.on_spike_event(0, 0);
        for k in 0..20 {
            e.on_tick(k * 10);
        }
        assert_relative_eq!(
            e.current_output().as_scalar().unwrap(),
            2.0 * 0.95f64.powi(20),
            epsilon = 1e-12
        );
    }

    #[test]
    fn unknown_neuron_is_dropped() {
        let (e, slot) = smoothing_engine(2);
        e.on_spike_event(1, 2);
        assert_eq!(e.faults(), 1);
        assert!(slot.is_empty());
    }

    #[test]
    fn policy_fault_leaves_output_unchanged() {
        // Multi policy expects an array; force a scalar output to make it fail.
        let slot = Arc::new(Slot::new());
        let e = SinkEngine::new(2, Box::new(SmoothingMulti::default()), slot);
        *e.output.lock() = BusValue::Scalar(1.0);
        e.on_tick(10);
        e.on_spike_event(10, 0);
        assert_eq!(e.current_output(), BusValue::Scalar(1.0));
        assert_eq!(e.faults(), 2);
    }

    #[test]
    fn window_tick_reads_history() {
        let slot = Arc::new(Slot::new());
        let e = SinkEngine::new(1, Box::new(SpikesPerWindow::new(100)), slot.clone());
        for t in [10, 50, 150, 205] {
            e.on_spike_event(t, 0);
        }
        e.on_tick(200);
        assert_eq!(slot.latest(), Some(BusValue::Scalar(2.0)));
    }

    #[test]
    fn reset_restores_initial_state() {
        let slot = Arc::new(Slot::new());
        let e = SinkEngine::new(3, Box::new(SmoothingMulti::default()), slot.clone())
            .with_recording();
        e.on_spike_event(1, 2);
        assert_eq!(e.recorded_outputs().len(), 1);
        e.reset();
        assert_eq!(e.current_output(), BusValue::zeros(3));
        assert_eq!(slot.latest(), Some(BusValue::zeros(3)));
        assert_eq!(e.spike_times(2), Some(vec![]));
        assert!(e.recorded_outputs().is_empty());
    }

    #[test]
    fn concurrent_spikes_and_ticks_are_serialised() {
        let slot = Arc::new(Slot::new());
        let e = Arc::new(SinkEngine::new(
            1,
            Box::new(Smoothing::new(1.0, 1.0, 1)),
            slot.clone(),
        ));
        let spiker = {
            let e = e.clone();
            thread::spawn(move || {
                for t in 0..500 {
                    e.on_spike_event(t, 0);
                }
            })
        };
        let ticker = {
            let e = e.clone();
            thread::spawn(move || {
                for t in 0..500 {
                    e.on_tick(t);
                }
            })
        };
        spiker.join().unwrap();
        ticker.join().unwrap();
        // decay 1.0 makes ticks neutral, so every spike must be counted.
        assert_eq!(e.current_output(), BusValue::Scalar(500.0));
        assert_eq!(slot.latest(), Some(BusValue::Scalar(500.0)));
    }
}

//! In-process stand-in for the simulation substrate.
//!
//! Each step is one millisecond of simulated time on a [`TimeWheel`]. The
//! substrate asks the source engine for every neuron's first interval at
//! start and again each time that neuron fires; an absent answer is asked
//! again on the next step. Fired spikes are delivered one-to-one to the sink
//! engine, which can optionally be ticked in simulated time as well.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use spike_bridge_core::{SpikeEvent, TimeWheel};
use tracing::{debug, trace};

use crate::conductor::{Conductor, BASE_TICK};
use crate::sink_engine::SinkEngine;
use crate::source_engine::SourceEngine;

/// Buckets of the calendar queue; one revolution is about a second.
pub const WHEEL_SIZE: u64 = 1024;

pub struct LocalSubstrate {
    n_neurons: usize,
    wheel: TimeWheel,
    source: Option<Arc<SourceEngine>>,
    sink: Option<Arc<SinkEngine>>,
    tick_sink: bool,
    repoll: Vec<bool>,
    fired: u64,
    started: bool,
}

impl LocalSubstrate {
    pub fn new(n_neurons: usize) -> Self {
        Self {
            n_neurons,
            wheel: TimeWheel::new(WHEEL_SIZE),
            source: None,
            sink: None,
            tick_sink: false,
            repoll: vec![false; n_neurons],
            fired: 0,
            started: false,
        }
    }

    /// Take both engines of `conductor`, if present.
    pub fn attach(conductor: &Conductor) -> Self {
        let mut s = Self::new(conductor.config().n_neurons);
        s.source = conductor.source().cloned();
        s.sink = conductor.sink().cloned();
        s
    }

    pub fn with_source(mut self, source: Arc<SourceEngine>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<SinkEngine>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Call the sink's `on_tick` every `calling_rate` simulated milliseconds.
    pub fn ticking_sink(mut self) -> Self {
        self.tick_sink = true;
        self
    }

    /// Ask every neuron for its first interval. Called once per run; `step`
    /// calls it on first use.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for neuron in 0..self.n_neurons {
            self.poll(neuron, self.wheel.current_time);
        }
        debug!(n_neurons = self.n_neurons, "substrate started");
    }

    /// Schedule a spike that did not come from the source engine.
    pub fn inject(&mut self, event: SpikeEvent) {
        self.wheel.schedule(event);
    }

    /// Advance one millisecond; returns the spikes fired in it.
    pub fn step(&mut self) -> Vec<SpikeEvent> {
        self.start();
        let now = self.wheel.current_time;

        for neuron in 0..self.n_neurons {
            if self.repoll[neuron] {
                self.poll(neuron, now);
            }
        }

        let fired = self.wheel.next();
        for ev in &fired {
            if let Some(sink) = &self.sink {
                sink.on_spike_event(ev.time, ev.neuron_id);
            }
            let neuron = ev.neuron_id as usize;
            if neuron < self.n_neurons && !self.repoll[neuron] {
                self.poll(neuron, ev.time);
            }
        }
        self.fired += fired.len() as u64;

        if self.tick_sink {
            if let Some(sink) = &self.sink {
                if now % u64::from(sink.calling_rate()) == 0 {
                    sink.on_tick(now);
                }
            }
        }
        if !fired.is_empty() {
            trace!(now, fired = fired.len(), "step");
        }
        fired
    }

    /// Step `ms` times without pacing; returns the number of spikes fired.
    pub fn run_for(&mut self, ms: u64) -> u64 {
        (0..ms).map(|_| self.step().len() as u64).sum()
    }

    /// Step once per wall-clock millisecond for `duration`, or until `stop`
    /// is raised.
    pub fn run_realtime(&mut self, duration: Duration, stop: &AtomicBool) -> u64 {
        let ticker = channel::tick(BASE_TICK);
        let steps = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut fired = 0;
        for _ in 0..steps {
            if stop.load(Ordering::Relaxed) || ticker.recv().is_err() {
                break;
            }
            fired += self.step().len() as u64;
        }
        fired
    }

    /// Current simulated time in milliseconds.
    pub fn now(&self) -> u64 {
        self.wheel.current_time
    }

    /// Spikes fired since start.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn pending(&self) -> usize {
        self.wheel.pending()
    }

    fn poll(&mut self, neuron: usize, now: u64) {
        let Some(source) = &self.source else {
            return;
        };
        match source.request_interval(neuron).and_then(delay_ms) {
            Some(delay) => {
                self.repoll[neuron] = false;
                self.wheel.schedule(SpikeEvent {
                    neuron_id: neuron as u32,
                    time: now.saturating_add(delay),
                });
            }
            None => self.repoll[neuron] = true,
        }
    }
}

/// Whole milliseconds until the next spike; at least one, absent for
/// non-positive or non-finite intervals.
fn delay_ms(interval: f64) -> Option<u64> {
    if interval.is_finite() && interval > 0.0 {
        Some((interval.round() as u64).max(1))
    } else {
        None
    }
}

//! Transfer policy contracts.
//!
//! A transfer policy is the pluggable rule between bus values and spikes. The
//! two capability sets are disjoint traits: a [`SourcePolicy`] encodes the last
//! bus value into inter-spike intervals, a [`SinkPolicy`] decodes spikes into
//! an output value. A policy may keep accumulator state between calls; that
//! state belongs to the policy instance and is cleared by `reset`, which the
//! owning engine calls at the start of every run.

use crate::error::PolicyResult;
use crate::neuron::Neuron;
use crate::value::BusValue;

/// Milliseconds until the neuron's next spike. `None` means "do not schedule
/// now, ask again on the next request".
pub type Interval = Option<f64>;

/// Encode path: bus value -> next inter-spike interval, per neuron.
pub trait SourcePolicy: Send {
    /// Called whenever neuron `neuron` needs its next spike scheduled.
    /// `value` is `None` until the first bus message has arrived.
    fn next_interval(
        &mut self,
        value: Option<&BusValue>,
        neuron: usize,
        n_neurons: usize,
    ) -> PolicyResult<Interval>;

    /// Clear per-run state for a population of `n_neurons`.
    fn reset(&mut self, _n_neurons: usize) {}

    fn name(&self) -> &'static str;
}

/// Decode path: spike history and spike events -> output value.
pub trait SinkPolicy: Send {
    /// `on_tick` runs every `calling_rate` base ticks (1 ms each).
    fn calling_rate(&self) -> u32 {
        1
    }

    /// Output value published before the first tick or spike.
    fn initial_output(&self, _n_neurons: usize) -> BusValue {
        BusValue::Scalar(0.0)
    }

    /// Periodic update from the full spike history at `sim_time` (ms).
    fn on_tick(
        &mut self,
        neurons: &[Neuron],
        sim_time: u64,
        current: &BusValue,
    ) -> PolicyResult<BusValue>;

    /// Event update for one spike. Default leaves the output unchanged.
    fn on_spike(
        &mut self,
        _spike_time: u64,
        _neuron: u32,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        Ok(current.clone())
    }

    /// Clear per-run state for a population of `n_neurons`.
    fn reset(&mut self, _n_neurons: usize) {}

    fn name(&self) -> &'static str;
}

/// Adapts a closure into a [`SourcePolicy`].
pub struct SourceFn<F>(pub F);

impl<F> SourceFn<F>
where
    F: FnMut(Option<&BusValue>, usize, usize) -> PolicyResult<Interval> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SourcePolicy for SourceFn<F>
where
    F: FnMut(Option<&BusValue>, usize, usize) -> PolicyResult<Interval> + Send,
{
    fn next_interval(
        &mut self,
        value: Option<&BusValue>,
        neuron: usize,
        n_neurons: usize,
    ) -> PolicyResult<Interval> {
        (self.0)(value, neuron, n_neurons)
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Adapts a tick closure (and the default no-op spike hook) into a [`SinkPolicy`].
pub struct SinkFn<F> {
    tick: F,
    calling_rate: u32,
}

impl<F> SinkFn<F>
where
    F: FnMut(&[Neuron], u64, &BusValue) -> PolicyResult<BusValue> + Send,
{
    pub fn new(calling_rate: u32, tick: F) -> Self {
        Self {
            tick,
            calling_rate: calling_rate.max(1),
        }
    }
}

impl<F> SinkPolicy for SinkFn<F>
where
    F: FnMut(&[Neuron], u64, &BusValue) -> PolicyResult<BusValue> + Send,
{
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn on_tick(
        &mut self,
        neurons: &[Neuron],
        sim_time: u64,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        (self.tick)(neurons, sim_time, current)
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}

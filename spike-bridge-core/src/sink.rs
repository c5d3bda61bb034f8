//! Built-in sink policies (spikes -> output value).

use heapless::Deque;

use crate::error::{PolicyError, PolicyResult};
use crate::neuron::Neuron;
use crate::policy::SinkPolicy;
use crate::value::BusValue;

pub const DEFAULT_WINDOW_MS: u64 = 100;
pub const DEFAULT_DECAY: f64 = 0.95;
pub const DEFAULT_INCREMENT: f64 = 1.0;
pub const DEFAULT_SMOOTHING_RATE: u32 = 10;

/// Samples in the spike response kernel.
pub const KERNEL_LEN: usize = 60;
/// Kernel sample spacing on the x axis of `x * exp(2 - x)`.
pub const KERNEL_STEP: f64 = 0.1;

/// `f(x) = x * exp(2 - x)` sampled at `x = 0, 0.1, .., 5.9`: a fast rise to a
/// peak of `e` at `x = 1` followed by a slow decay.
pub fn spike_response() -> [f64; KERNEL_LEN] {
    let mut kernel = [0.0; KERNEL_LEN];
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 * KERNEL_STEP;
        *k = x * (2.0 - x).exp();
    }
    kernel
}

/// Number of spikes across the population in the trailing window
/// `(sim_time - window, ..]`.
///
/// Keeps one cursor per neuron into its ordered history so each tick only
/// looks at spikes that entered or left the window.
#[derive(Debug, Clone)]
pub struct SpikesPerWindow {
    pub window_ms: u64,
    calling_rate: u32,
    cursors: Vec<usize>,
    last_tick: u64,
}

impl SpikesPerWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            calling_rate: 1,
            cursors: Vec::new(),
            last_tick: 0,
        }
    }

    pub fn with_calling_rate(mut self, rate: u32) -> Self {
        self.calling_rate = rate.max(1);
        self
    }
}

impl Default for SpikesPerWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl SinkPolicy for SpikesPerWindow {
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn on_tick(
        &mut self,
        neurons: &[Neuron],
        sim_time: u64,
        _current: &BusValue,
    ) -> PolicyResult<BusValue> {
        // Cursors only move forward; a clock that went backwards starts over.
        if sim_time < self.last_tick {
            self.cursors.iter_mut().for_each(|c| *c = 0);
        }
        self.last_tick = sim_time;
        if self.cursors.len() < neurons.len() {
            self.cursors.resize(neurons.len(), 0);
        }

        let threshold = sim_time as i64 - self.window_ms as i64;
        let mut count = 0usize;
        for (neuron, cursor) in neurons.iter().zip(self.cursors.iter_mut()) {
            let times = neuron.spike_times();
            while *cursor < times.len() && times[*cursor] as i64 <= threshold {
                *cursor += 1;
            }
            count += times.len() - *cursor;
        }
        Ok(BusValue::Scalar(count as f64))
    }

    fn reset(&mut self, n_neurons: usize) {
        self.cursors.clear();
        self.cursors.resize(n_neurons, 0);
        self.last_tick = 0;
    }

    fn name(&self) -> &'static str {
        "spikes_per_window"
    }
}

/// Leaky integrator: each spike adds `increment`, each tick multiplies by `decay`.
#[derive(Debug, Clone)]
pub struct Smoothing {
    pub decay: f64,
    pub increment: f64,
    calling_rate: u32,
}

impl Smoothing {
    pub fn new(decay: f64, increment: f64, calling_rate: u32) -> Self {
        Self {
            decay,
            increment,
            calling_rate: calling_rate.max(1),
        }
    }
}

impl Default for Smoothing {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY, DEFAULT_INCREMENT, DEFAULT_SMOOTHING_RATE)
    }
}

impl SinkPolicy for Smoothing {
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn on_tick(
        &mut self,
        _neurons: &[Neuron],
        _sim_time: u64,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        Ok(BusValue::Scalar(current.scalar()? * self.decay))
    }

    fn on_spike(
        &mut self,
        _spike_time: u64,
        _neuron: u32,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        Ok(BusValue::Scalar(current.scalar()? + self.increment))
    }

    fn name(&self) -> &'static str {
        "smoothing"
    }
}

/// [`Smoothing`] with one integrator per neuron; the output is an array.
#[derive(Debug, Clone)]
pub struct SmoothingMulti {
    pub decay: f64,
    pub increment: f64,
    calling_rate: u32,
}

impl SmoothingMulti {
    pub fn new(decay: f64, increment: f64, calling_rate: u32) -> Self {
        Self {
            decay,
            increment,
            calling_rate: calling_rate.max(1),
        }
    }
}

impl Default for SmoothingMulti {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY, DEFAULT_INCREMENT, DEFAULT_SMOOTHING_RATE)
    }
}

impl SinkPolicy for SmoothingMulti {
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn initial_output(&self, n_neurons: usize) -> BusValue {
        BusValue::zeros(n_neurons)
    }

    fn on_tick(
        &mut self,
        neurons: &[Neuron],
        _sim_time: u64,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        let values = current.array_of(neurons.len())?;
        Ok(BusValue::Array(values.iter().map(|v| v * self.decay).collect()))
    }

    fn on_spike(
        &mut self,
        _spike_time: u64,
        neuron: u32,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        let values = current.as_array().ok_or_else(|| PolicyError::ShapeMismatch {
            expected: "array",
            got: current.shape(),
        })?;
        let idx = neuron as usize;
        if idx >= values.len() {
            return Err(PolicyError::NeuronOutOfRange {
                neuron: idx,
                n_neurons: values.len(),
            });
        }
        let mut next = values.to_vec();
        next[idx] += self.increment;
        Ok(BusValue::Array(next))
    }

    fn name(&self) -> &'static str {
        "smoothing_multi"
    }
}

type ResponseBuffer = Deque<f64, KERNEL_LEN>;

fn filled_buffer(neutral: f64) -> ResponseBuffer {
    let mut buf = Deque::new();
    for _ in 0..KERNEL_LEN {
        let _ = buf.push_back(neutral);
    }
    buf
}

fn superpose(buf: &mut ResponseBuffer, kernel: &[f64; KERNEL_LEN]) {
    for (slot, k) in buf.iter_mut().zip(kernel.iter()) {
        *slot += k;
    }
}

/// Pop the head as this tick's value and refill the tail with `neutral`.
fn shift(buf: &mut ResponseBuffer, neutral: f64) -> f64 {
    let head = buf.pop_front().unwrap_or(neutral);
    let _ = buf.push_back(neutral);
    head
}

/// Discrete-time convolution of the population spike train with
/// [`spike_response`]. Each spike adds the kernel onto the response buffer;
/// each tick emits the buffer head and appends `neutral` at the tail.
#[derive(Debug, Clone)]
pub struct Convolution {
    pub neutral: f64,
    calling_rate: u32,
    kernel: [f64; KERNEL_LEN],
    buffer: ResponseBuffer,
}

impl Convolution {
    pub fn new(neutral: f64, calling_rate: u32) -> Self {
        Self {
            neutral,
            calling_rate: calling_rate.max(1),
            kernel: spike_response(),
            buffer: filled_buffer(neutral),
        }
    }

    pub fn kernel(&self) -> &[f64; KERNEL_LEN] {
        &self.kernel
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_sum(&self) -> f64 {
        self.buffer.iter().sum()
    }
}

impl Default for Convolution {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_SMOOTHING_RATE)
    }
}

impl SinkPolicy for Convolution {
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn initial_output(&self, _n_neurons: usize) -> BusValue {
        BusValue::Scalar(self.neutral)
    }

    fn on_tick(
        &mut self,
        _neurons: &[Neuron],
        _sim_time: u64,
        _current: &BusValue,
    ) -> PolicyResult<BusValue> {
        Ok(BusValue::Scalar(shift(&mut self.buffer, self.neutral)))
    }

    fn on_spike(
        &mut self,
        _spike_time: u64,
        _neuron: u32,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        superpose(&mut self.buffer, &self.kernel);
        Ok(current.clone())
    }

    fn reset(&mut self, _n_neurons: usize) {
        self.buffer = filled_buffer(self.neutral);
    }

    fn name(&self) -> &'static str {
        "convolution"
    }
}

/// [`Convolution`] with one response buffer per neuron; each tick emits the
/// array of per-neuron buffer heads.
#[derive(Debug, Clone)]
pub struct ConvolutionMulti {
    pub neutral: f64,
    calling_rate: u32,
    kernel: [f64; KERNEL_LEN],
    buffers: Vec<ResponseBuffer>,
}

impl ConvolutionMulti {
    pub fn new(neutral: f64, calling_rate: u32) -> Self {
        Self {
            neutral,
            calling_rate: calling_rate.max(1),
            kernel: spike_response(),
            buffers: Vec::new(),
        }
    }

    fn ensure_buffers(&mut self, n_neurons: usize) {
        while self.buffers.len() < n_neurons {
            self.buffers.push(filled_buffer(self.neutral));
        }
    }

    pub fn buffer_sum(&self, neuron: usize) -> Option<f64> {
        self.buffers.get(neuron).map(|b| b.iter().sum())
    }
}

impl Default for ConvolutionMulti {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_SMOOTHING_RATE)
    }
}

impl SinkPolicy for ConvolutionMulti {
    fn calling_rate(&self) -> u32 {
        self.calling_rate
    }

    fn initial_output(&self, n_neurons: usize) -> BusValue {
        BusValue::Array(vec![self.neutral; n_neurons])
    }

    fn on_tick(
        &mut self,
        neurons: &[Neuron],
        _sim_time: u64,
        _current: &BusValue,
    ) -> PolicyResult<BusValue> {
        self.ensure_buffers(neurons.len());
        let neutral = self.neutral;
        let heads = self.buffers.iter_mut().map(|b| shift(b, neutral)).collect();
        Ok(BusValue::Array(heads))
    }

    fn on_spike(
        &mut self,
        _spike_time: u64,
        neuron: u32,
        current: &BusValue,
    ) -> PolicyResult<BusValue> {
        let n_neurons = self.buffers.len();
        let buf = self
            .buffers
            .get_mut(neuron as usize)
            .ok_or(PolicyError::NeuronOutOfRange {
                neuron: neuron as usize,
                n_neurons,
            })?;
        superpose(buf, &self.kernel);
        Ok(current.clone())
    }

    fn reset(&mut self, n_neurons: usize) {
        self.buffers.clear();
        self.ensure_buffers(n_neurons);
    }

    fn name(&self) -> &'static str {
        "convolution_multi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn window_counts_recent_spikes() {
        let neurons = vec![Neuron::with_spikes(0, vec![10, 50, 150, 205])];
        let mut p = SpikesPerWindow::new(100);
        p.reset(1);
        let out = p.on_tick(&neurons, 200, &BusValue::Scalar(0.0)).unwrap();
        assert_eq!(out, BusValue::Scalar(2.0));
    }

    #[test]
    fn window_sums_across_neurons_and_slides() {
        let neurons = vec![
            Neuron::with_spikes(0, vec![10, 120]),
            Neuron::with_spikes(1, vec![90, 130, 180]),
        ];
        let mut p = SpikesPerWindow::new(100);
        p.reset(2);
        let cur = BusValue::Scalar(0.0);
        assert_eq!(p.on_tick(&neurons, 150, &cur).unwrap(), BusValue::Scalar(4.0));
        assert_eq!(p.on_tick(&neurons, 230, &cur).unwrap(), BusValue::Scalar(1.0));
        // Clock restart falls back to a full scan.
        assert_eq!(p.on_tick(&neurons, 50, &cur).unwrap(), BusValue::Scalar(5.0));
    }

    #[test]
    fn window_early_in_run_counts_everything() {
        let neurons = vec![Neuron::with_spikes(0, vec![0, 5])];
        let mut p = SpikesPerWindow::default();
        let out = p.on_tick(&neurons, 20, &BusValue::Scalar(0.0)).unwrap();
        assert_eq!(out, BusValue::Scalar(2.0));
    }

    #[test]
    fn smoothing_decays_geometrically() {
        let mut p = Smoothing::default();
        assert_eq!(p.calling_rate(), 10);
        let v0 = 8.0;
        let mut cur = BusValue::Scalar(v0);
        for _ in 0..7 {
            cur = p.on_tick(&[], 0, &cur).unwrap();
        }
        assert_relative_eq!(cur.as_scalar().unwrap(), v0 * 0.95f64.powi(7), epsilon = 1e-12);
    }

    #[test]
    fn smoothing_spike_adds_one() {
        let mut p = Smoothing::default();
        let cur = p.on_spike(3, 0, &BusValue::Scalar(2.5)).unwrap();
        assert_eq!(cur, BusValue::Scalar(3.5));
        let cur = p.on_tick(&[], 10, &cur).unwrap();
        assert_relative_eq!(cur.as_scalar().unwrap(), 3.5 * 0.95);
        assert!(p.on_spike(0, 0, &BusValue::Array(vec![1.0])).is_err());
    }

    #[test]
    fn smoothing_multi_keeps_neurons_apart() {
        let mut p = SmoothingMulti::default();
        let neurons = crate::neuron::population(3);
        let mut cur = p.initial_output(3);
        cur = p.on_spike(1, 1, &cur).unwrap();
        cur = p.on_spike(2, 1, &cur).unwrap();
        cur = p.on_spike(2, 2, &cur).unwrap();
        assert_eq!(cur, BusValue::Array(vec![0.0, 2.0, 1.0]));
        cur = p.on_tick(&neurons, 10, &cur).unwrap();
        assert_eq!(cur, BusValue::Array(vec![0.0, 2.0 * 0.95, 0.95]));
        assert!(p.on_spike(0, 3, &cur).is_err());
    }

    #[test]
    fn kernel_shape() {
        let k = spike_response();
        assert_eq!(k[0], 0.0);
        assert_relative_eq!(k[10], std::f64::consts::E, epsilon = 1e-12);
        assert!(k.iter().all(|v| *v <= std::f64::consts::E + 1e-12));
        assert!(k[59] < k[20]);
    }

    #[test]
    fn convolution_buffer_length_is_invariant() {
        let mut p = Convolution::default();
        p.on_spike(0, 0, &BusValue::Scalar(0.0)).unwrap();
        for t in 0..(2 * KERNEL_LEN as u64) {
            let before = p.buffer_sum();
            let out = p.on_tick(&[], t, &BusValue::Scalar(0.0)).unwrap();
            let popped = out.as_scalar().unwrap();
            assert_eq!(p.buffer_len(), KERNEL_LEN);
            assert_relative_eq!(p.buffer_sum(), before - popped + p.neutral, epsilon = 1e-9);
        }
    }

    #[test]
    fn convolution_replays_the_kernel() {
        let mut p = Convolution::default();
        let cur = BusValue::Scalar(0.0);
        let after_spike = p.on_spike(0, 0, &cur).unwrap();
        assert_eq!(after_spike, cur);
        let kernel = *p.kernel();
        for expected in kernel.iter() {
            let out = p.on_tick(&[], 0, &cur).unwrap();
            assert_relative_eq!(out.as_scalar().unwrap(), *expected, epsilon = 1e-12);
        }
        assert_eq!(p.on_tick(&[], 0, &cur).unwrap(), BusValue::Scalar(0.0));
    }

    #[test]
    fn convolution_reset_clears_response() {
        let mut p = Convolution::default();
        p.on_spike(0, 0, &BusValue::Scalar(0.0)).unwrap();
        assert!(p.buffer_sum() > 0.0);
        p.reset(1);
        assert_eq!(p.buffer_sum(), 0.0);
        assert_eq!(p.buffer_len(), KERNEL_LEN);
    }

    #[test]
    fn convolution_multi_emits_per_neuron_heads() {
        let mut p = ConvolutionMulti::default();
        p.reset(2);
        let neurons = crate::neuron::population(2);
        let cur = p.initial_output(2);
        p.on_spike(0, 1, &cur).unwrap();
        let k = spike_response();
        let first = p.on_tick(&neurons, 10, &cur).unwrap();
        assert_eq!(first, BusValue::Array(vec![0.0, k[0]]));
        let second = p.on_tick(&neurons, 20, &cur).unwrap();
        assert_eq!(second, BusValue::Array(vec![0.0, k[1]]));
        assert!(p.buffer_sum(1).unwrap() > 0.0);
        assert!(p.on_spike(0, 2, &cur).is_err());
    }
}

//! Per-neuron spike history as seen by sink policies

/// A neuron of the observed population and every spike it fired this run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Neuron {
    pub key: u32,
    spike_times: Vec<u64>,
}

impl Neuron {
    pub fn new(key: u32) -> Self {
        Self {
            key,
            spike_times: Vec::new(),
        }
    }

    /// Build a neuron with a pre-recorded history. Times are sorted on the way in.
    pub fn with_spikes(key: u32, mut times: Vec<u64>) -> Self {
        times.sort_unstable();
        Self {
            key,
            spike_times: times,
        }
    }

    /// Append a spike. The history never goes backwards: a timestamp older than
    /// the last one is stored as the last one.
    pub fn record_spike(&mut self, time: u64) {
        let time = match self.spike_times.last() {
            Some(&last) if time < last => last,
            _ => time,
        };
        self.spike_times.push(time);
    }

    /// Non-decreasing spike timestamps in milliseconds since run start.
    pub fn spike_times(&self) -> &[u64] {
        &self.spike_times
    }

    pub fn spike_count(&self) -> usize {
        self.spike_times.len()
    }

    pub fn last_spike(&self) -> Option<u64> {
        self.spike_times.last().copied()
    }

    pub fn clear(&mut self) {
        self.spike_times.clear();
    }
}

/// One fresh neuron per key in `0..n`.
pub fn population(n: usize) -> Vec<Neuron> {
    (0..n as u32).map(Neuron::new).collect()
}

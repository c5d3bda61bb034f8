//! Built-in source policies (bus value -> inter-spike interval).
//!
//! Scalar inputs apply to every neuron. Array inputs carry one value per
//! neuron and must match the population size.

use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::error::{PolicyError, PolicyResult};
use crate::policy::{Interval, SourcePolicy};
use crate::value::BusValue;

/// Interval given to enabled neurons by [`ThresholdCount`], in ms.
pub const DEFAULT_THRESHOLD_INTERVAL_MS: f64 = 1000.0;

/// The value that applies to `neuron`, or `None` if nothing has arrived yet.
fn neuron_value(
    value: Option<&BusValue>,
    neuron: usize,
    n_neurons: usize,
) -> PolicyResult<Option<f64>> {
    if neuron >= n_neurons {
        return Err(PolicyError::NeuronOutOfRange { neuron, n_neurons });
    }
    let v = match value {
        None => return Ok(None),
        Some(BusValue::Scalar(v)) => *v,
        Some(array) => array.array_of(n_neurons)?[neuron],
    };
    if v.is_nan() {
        return Err(PolicyError::InvalidInput("NaN".to_string()));
    }
    Ok(Some(v))
}

/// Every neuron spikes with the input value as its interval.
/// Absent or non-positive input silences the population.
#[derive(Debug, Default, Clone)]
pub struct ConstantRate;

impl SourcePolicy for ConstantRate {
    fn next_interval(
        &mut self,
        value: Option<&BusValue>,
        neuron: usize,
        n_neurons: usize,
    ) -> PolicyResult<Interval> {
        Ok(neuron_value(value, neuron, n_neurons)?.filter(|v| *v > 0.0))
    }

    fn name(&self) -> &'static str {
        "constant_rate"
    }
}

/// Poisson spike train per neuron with the input value as mean interval (ms).
///
/// Each neuron draws from its own ChaCha stream of a shared seed, so the
/// sequence a neuron sees does not depend on how requests for different
/// neurons interleave.
#[derive(Debug, Clone)]
pub struct Poisson {
    seed: u64,
    streams: Vec<ChaCha8Rng>,
}

impl Poisson {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            streams: Vec::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn stream(&self, neuron: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(neuron as u64);
        rng
    }

    fn ensure_streams(&mut self, n_neurons: usize) {
        while self.streams.len() < n_neurons {
            let rng = self.stream(self.streams.len());
            self.streams.push(rng);
        }
    }
}

impl Default for Poisson {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePolicy for Poisson {
    fn next_interval(
        &mut self,
        value: Option<&BusValue>,
        neuron: usize,
        n_neurons: usize,
    ) -> PolicyResult<Interval> {
        let mean = match neuron_value(value, neuron, n_neurons)? {
            Some(v) if v > 0.0 => v,
            _ => return Ok(None),
        };
        let exp = Exp::new(1.0 / mean)
            .map_err(|e| PolicyError::InvalidParameter(format!("exponential rate: {e}")))?;
        self.ensure_streams(n_neurons);
        Ok(Some(exp.sample(&mut self.streams[neuron])))
    }

    fn reset(&mut self, n_neurons: usize) {
        self.streams.clear();
        self.ensure_streams(n_neurons);
    }

    fn name(&self) -> &'static str {
        "poisson"
    }
}

/// The input is the number of neurons that should fire: neurons with index
/// below it spike every `interval_ms`, the rest stay silent.
#[derive(Debug, Clone)]
pub struct ThresholdCount {
    pub interval_ms: f64,
}

impl ThresholdCount {
    pub fn new(interval_ms: f64) -> Self {
        Self { interval_ms }
    }
}

impl Default for ThresholdCount {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_INTERVAL_MS)
    }
}

impl SourcePolicy for ThresholdCount {
    fn next_interval(
        &mut self,
        value: Option<&BusValue>,
        neuron: usize,
        n_neurons: usize,
    ) -> PolicyResult<Interval> {
        if neuron >= n_neurons {
            return Err(PolicyError::NeuronOutOfRange { neuron, n_neurons });
        }
        let count = match value {
            None => return Ok(None),
            Some(v) => v.scalar()?,
        };
        if (neuron + 1) as f64 <= count {
            Ok(Some(self.interval_ms))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &'static str {
        "threshold_count"
    }
}

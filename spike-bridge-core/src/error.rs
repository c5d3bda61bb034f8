use thiserror::Error;

/// Faults a transfer policy can report for one request.
///
/// Engines treat every variant the same way: the request contributes nothing
/// (absent interval, unchanged output) and the fault is logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: &'static str, got: String },
    #[error("neuron {neuron} out of range for population of {n_neurons}")]
    NeuronOutOfRange { neuron: usize, n_neurons: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type PolicyResult<T, E = PolicyError> = core::result::Result<T, E>;

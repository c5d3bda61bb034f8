//! spike-bridge-core: spike events, per-neuron spike history and the transfer
//! policies that translate between bus values and spikes.

pub mod error;
pub mod event_queue;
pub mod kind;
pub mod neuron;
pub mod policy;
pub mod sink;
pub mod source;
pub mod value;

// Re-exports
pub use error::{PolicyError, PolicyResult};
pub use event_queue::{SpikeEvent, TimeWheel};
pub use kind::{SinkKind, SourceKind};
pub use neuron::Neuron;
pub use policy::{Interval, SinkFn, SinkPolicy, SourceFn, SourcePolicy};
pub use sink::{Convolution, ConvolutionMulti, Smoothing, SmoothingMulti, SpikesPerWindow};
pub use source::{ConstantRate, Poisson, ThresholdCount};
pub use value::BusValue;

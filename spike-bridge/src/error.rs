use thiserror::Error;

use crate::lifecycle::{ConductorState, LifecycleEvent};

/// Construction-time faults. Fatal: no interface is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("neuron count must be at least 1")]
    ZeroNeurons,
    #[error("an interface needs a source policy, a sink policy, or both")]
    MissingPolicy,
    #[error("clock rate must be a positive number of Hz, got {0}")]
    InvalidClockRate(f64),
    #[error("output rate must be a positive number of Hz, got {0}")]
    InvalidOutputRate(f64),
    #[error("output rate {output} Hz exceeds clock rate {clock} Hz")]
    OutputRateExceedsClock { output: f64, clock: f64 },
    #[error("{0} topic is empty")]
    EmptyTopic(&'static str),
    #[error("inbound and outbound topics are both '{0}'")]
    TopicClash(String),
    #[error("port base {base} + interface id {id} does not fit a port number")]
    PortOverflow { base: u16, id: u32 },
}

/// Message bus and control channel faults. Retried on the worker's clock.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("cannot handle {event:?} while {from:?}")]
    InvalidTransition {
        from: ConductorState,
        event: LifecycleEvent,
    },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("cannot create timing histogram: {0:?}")]
    Histogram(hdrhistogram::CreationError),
}

pub type Result<T, E = BridgeError> = core::result::Result<T, E>;

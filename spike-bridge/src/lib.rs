//! spike-bridge: real-time runtime around the spike-bridge-core policies.
//!
//! - Channel slots between the bus worker and the substrate-facing engines
//! - Source and sink engines with fault isolation
//! - Interface conductor (lifecycle, identities, ports, bus worker, timings)
//! - Poisson live-rate conductor
//! - In-process and UDP message buses, loopback substrate

pub mod bench;
pub mod bus;
pub mod conductor;
pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod rate;
pub mod sink_engine;
pub mod slot;
pub mod source_engine;
pub mod substrate;
pub mod timer;
pub mod udp;
pub mod worker;

// Re-exports
pub use bench::{TimingRecorder, TimingReport};
pub use bus::{LocalBus, MessageBus, Subscription};
pub use conductor::{Conductor, ConductorBuilder, PortMap, Recording};
pub use config::{InterfaceConfig, PortBases, RateInterfaceConfig};
pub use error::{BridgeError, ConfigError, Result, TransportError};
pub use identity::{InterfaceId, InterfaceRegistry};
pub use lifecycle::{ConductorState, LifecycleEvent};
pub use rate::{MemoryRateConnector, RateConductor, RateControl, RateControlConnector};
pub use sink_engine::SinkEngine;
pub use slot::Slot;
pub use source_engine::SourceEngine;
pub use substrate::LocalSubstrate;
pub use udp::{UdpBus, UdpRateConnector};

pub use spike_bridge_core::{BusValue, SinkKind, SinkPolicy, SourceKind, SourcePolicy, SpikeEvent};

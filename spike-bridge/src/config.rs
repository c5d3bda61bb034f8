//! Construction-time configuration. There is no runtime configuration surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spike_bridge_core::{SinkKind, SourceKind};

use crate::error::ConfigError;

pub const DEFAULT_TOPIC_IN: &str = "to_spinnaker";
pub const DEFAULT_TOPIC_OUT: &str = "from_spinnaker";
pub const DEFAULT_TOPIC_RATES: &str = "to_spinnaker_poisson";
pub const DEFAULT_CLOCK_RATE_HZ: f64 = 1000.0;
pub const DEFAULT_OUTPUT_RATE_HZ: f64 = 10.0;

pub const DEFAULT_LIVE_OUTPUT_PORT: u16 = 19999;
pub const DEFAULT_INJECTOR_PORT: u16 = 17895;
pub const DEFAULT_BOARD_PORT: u16 = 12345;
pub const DEFAULT_RATE_CONTROL_PORT: u16 = 30000;

/// Base port numbers; each interface adds its id to every base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortBases {
    pub live_output: u16,
    pub injector: u16,
    pub board: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            live_output: DEFAULT_LIVE_OUTPUT_PORT,
            injector: DEFAULT_INJECTOR_PORT,
            board: DEFAULT_BOARD_PORT,
        }
    }
}

/// Configuration of a spike-timing interface (source and/or sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub n_neurons: usize,
    /// Label of the simulation population the engines are wired to.
    pub population: String,
    pub topic_in: String,
    pub topic_out: String,
    /// Worker clock, also the rate inbound values reach the source slot.
    pub clock_rate_hz: f64,
    /// How often the current output is published on `topic_out`.
    pub output_rate_hz: f64,
    pub benchmark: bool,
    pub record: bool,
    pub ports: PortBases,
    pub source: Option<SourceKind>,
    pub sink: Option<SinkKind>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            n_neurons: 1,
            population: "pop".to_string(),
            topic_in: DEFAULT_TOPIC_IN.to_string(),
            topic_out: DEFAULT_TOPIC_OUT.to_string(),
            clock_rate_hz: DEFAULT_CLOCK_RATE_HZ,
            output_rate_hz: DEFAULT_OUTPUT_RATE_HZ,
            benchmark: false,
            record: false,
            ports: PortBases::default(),
            source: None,
            sink: None,
        }
    }
}

fn check_rate(rate: f64, err: fn(f64) -> ConfigError) -> Result<(), ConfigError> {
    // The clock period must fit a Duration, or spawning the timer panics.
    if rate.is_finite() && rate > 0.0 && Duration::try_from_secs_f64(1.0 / rate).is_ok() {
        Ok(())
    } else {
        Err(err(rate))
    }
}

impl InterfaceConfig {
    /// Check everything that does not depend on which policies end up attached.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_neurons == 0 {
            return Err(ConfigError::ZeroNeurons);
        }
        check_rate(self.clock_rate_hz, ConfigError::InvalidClockRate)?;
        check_rate(self.output_rate_hz, ConfigError::InvalidOutputRate)?;
        if self.output_rate_hz > self.clock_rate_hz {
            return Err(ConfigError::OutputRateExceedsClock {
                output: self.output_rate_hz,
                clock: self.clock_rate_hz,
            });
        }
        Ok(())
    }

    /// Topic checks for the paths actually in use.
    pub fn validate_topics(&self, inbound: bool, outbound: bool) -> Result<(), ConfigError> {
        if inbound && self.topic_in.trim().is_empty() {
            return Err(ConfigError::EmptyTopic("inbound"));
        }
        if outbound && self.topic_out.trim().is_empty() {
            return Err(ConfigError::EmptyTopic("outbound"));
        }
        if inbound && outbound && self.topic_in == self.topic_out {
            return Err(ConfigError::TopicClash(self.topic_in.clone()));
        }
        Ok(())
    }

    /// Worker clock ticks between two publications, at least 1.
    pub fn publish_every(&self) -> u64 {
        (self.clock_rate_hz / self.output_rate_hz).round().max(1.0) as u64
    }
}

/// Configuration of a Poisson live-rate interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateInterfaceConfig {
    pub n_neurons: usize,
    pub population: String,
    pub topic_rates: String,
    pub clock_rate_hz: f64,
    pub benchmark: bool,
    pub control_base_port: u16,
}

impl Default for RateInterfaceConfig {
    fn default() -> Self {
        Self {
            n_neurons: 1,
            population: "poisson_input".to_string(),
            topic_rates: DEFAULT_TOPIC_RATES.to_string(),
            clock_rate_hz: DEFAULT_CLOCK_RATE_HZ,
            benchmark: false,
            control_base_port: DEFAULT_RATE_CONTROL_PORT,
        }
    }
}

impl RateInterfaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_neurons == 0 {
            return Err(ConfigError::ZeroNeurons);
        }
        check_rate(self.clock_rate_hz, ConfigError::InvalidClockRate)?;
        if self.topic_rates.trim().is_empty() {
            return Err(ConfigError::EmptyTopic("rate"));
        }
        Ok(())
    }
}

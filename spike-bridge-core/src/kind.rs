//! Built-in policy selection as data, so a config file can name a policy.

use serde::{Deserialize, Serialize};

use crate::policy::{SinkPolicy, SourcePolicy};
use crate::sink::{
    Convolution, ConvolutionMulti, Smoothing, SmoothingMulti, SpikesPerWindow, DEFAULT_DECAY,
    DEFAULT_INCREMENT, DEFAULT_SMOOTHING_RATE, DEFAULT_WINDOW_MS,
};
use crate::source::{ConstantRate, Poisson, ThresholdCount, DEFAULT_THRESHOLD_INTERVAL_MS};

fn default_threshold_interval() -> f64 {
    DEFAULT_THRESHOLD_INTERVAL_MS
}
fn default_window() -> u64 {
    DEFAULT_WINDOW_MS
}
fn default_decay() -> f64 {
    DEFAULT_DECAY
}
fn default_increment() -> f64 {
    DEFAULT_INCREMENT
}
fn default_smoothing_rate() -> u32 {
    DEFAULT_SMOOTHING_RATE
}
fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    ConstantRate,
    Poisson {
        #[serde(default)]
        seed: Option<u64>,
    },
    ThresholdCount {
        #[serde(default = "default_threshold_interval")]
        interval_ms: f64,
    },
}

impl SourceKind {
    pub fn build(&self) -> Box<dyn SourcePolicy> {
        match self {
            SourceKind::ConstantRate => Box::new(ConstantRate),
            SourceKind::Poisson { seed: Some(seed) } => Box::new(Poisson::with_seed(*seed)),
            SourceKind::Poisson { seed: None } => Box::new(Poisson::new()),
            SourceKind::ThresholdCount { interval_ms } => {
                Box::new(ThresholdCount::new(*interval_ms))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkKind {
    SpikesPerWindow {
        #[serde(default = "default_window")]
        window_ms: u64,
        #[serde(default = "one")]
        calling_rate: u32,
    },
    Smoothing {
        #[serde(default = "default_decay")]
        decay: f64,
        #[serde(default = "default_increment")]
        increment: f64,
        #[serde(default = "default_smoothing_rate")]
        calling_rate: u32,
    },
    SmoothingMulti {
        #[serde(default = "default_decay")]
        decay: f64,
        #[serde(default = "default_increment")]
        increment: f64,
        #[serde(default = "default_smoothing_rate")]
        calling_rate: u32,
    },
    Convolution {
        #[serde(default)]
        neutral: f64,
        #[serde(default = "default_smoothing_rate")]
        calling_rate: u32,
    },
    ConvolutionMulti {
        #[serde(default)]
        neutral: f64,
        #[serde(default = "default_smoothing_rate")]
        calling_rate: u32,
    },
}

impl SinkKind {
    pub fn build(&self) -> Box<dyn SinkPolicy> {
        match *self {
            SinkKind::SpikesPerWindow { window_ms, calling_rate } => {
                Box::new(SpikesPerWindow::new(window_ms).with_calling_rate(calling_rate))
            }
            SinkKind::Smoothing { decay, increment, calling_rate } => {
                Box::new(Smoothing::new(decay, increment, calling_rate))
            }
            SinkKind::SmoothingMulti { decay, increment, calling_rate } => {
                Box::new(SmoothingMulti::new(decay, increment, calling_rate))
            }
            SinkKind::Convolution { neutral, calling_rate } => {
                Box::new(Convolution::new(neutral, calling_rate))
            }
            SinkKind::ConvolutionMulti { neutral, calling_rate } => {
                Box::new(ConvolutionMulti::new(neutral, calling_rate))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_from_json() {
        let k: SourceKind = serde_json::from_str(r#"{"kind": "poisson", "seed": 9}"#).unwrap();
        assert_eq!(k, SourceKind::Poisson { seed: Some(9) });
        assert_eq!(k.build().name(), "poisson");

        let k: SourceKind = serde_json::from_str(r#"{"kind": "threshold_count"}"#).unwrap();
        assert_eq!(k, SourceKind::ThresholdCount { interval_ms: 1000.0 });
    }

    #[test]
    fn sink_kind_defaults_follow_policies() {
        let k: SinkKind = serde_json::from_str(r#"{"kind": "smoothing"}"#).unwrap();
        let p = k.build();
        assert_eq!(p.name(), "smoothing");
        assert_eq!(p.calling_rate(), 10);

        let k: SinkKind = serde_json::from_str(r#"{"kind": "spikes_per_window"}"#).unwrap();
        assert_eq!(k.build().calling_rate(), 1);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<SinkKind>(r#"{"kind": "mystery"}"#).is_err());
    }
}

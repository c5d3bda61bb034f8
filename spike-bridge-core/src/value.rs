//! Values carried on the message bus: a scalar or a fixed-length array.

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Inbound or outbound bus payload. Serialised untagged, so `3.5` and
/// `[1.0, 2.0]` are both valid on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusValue {
    Scalar(f64),
    Array(Vec<f64>),
}

impl BusValue {
    pub fn zeros(n: usize) -> Self {
        BusValue::Array(vec![0.0; n])
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            BusValue::Scalar(v) => Some(*v),
            BusValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            BusValue::Scalar(_) => None,
            BusValue::Array(v) => Some(v),
        }
    }

    /// The scalar payload, or a shape error naming what arrived instead.
    pub fn scalar(&self) -> PolicyResult<f64> {
        self.as_scalar().ok_or_else(|| PolicyError::ShapeMismatch {
            expected: "scalar",
            got: self.shape(),
        })
    }

    /// The array payload with exactly `len` entries.
    pub fn array_of(&self, len: usize) -> PolicyResult<&[f64]> {
        match self {
            BusValue::Array(v) if v.len() == len => Ok(v),
            other => Err(PolicyError::ShapeMismatch {
                expected: "array of the population size",
                got: other.shape(),
            }),
        }
    }

    pub fn shape(&self) -> String {
        match self {
            BusValue::Scalar(_) => "scalar".to_string(),
            BusValue::Array(v) => format!("array[{}]", v.len()),
        }
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        BusValue::Scalar(v)
    }
}

impl From<Vec<f64>> for BusValue {
    fn from(v: Vec<f64>) -> Self {
        BusValue::Array(v)
    }
}

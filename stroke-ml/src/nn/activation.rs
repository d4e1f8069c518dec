//! Activation functions.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Linear => z.clone(),
            Self::Relu => z.mapv(|v| v.max(0.0)),
            Self::Sigmoid => z.mapv(sigmoid),
        }
    }

    /// Derivative expressed through the activation output `a`.
    pub fn derivative_from_output(&self, a: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Linear => Array2::ones(a.raw_dim()),
            Self::Relu => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Self::Sigmoid => a.mapv(|v| v * (1.0 - v)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

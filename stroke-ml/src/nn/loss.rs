//! Binary cross-entropy loss and binary accuracy metric.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Probability clipping bound.
pub const EPSILON: f32 = 1e-7;

/// Prediction threshold for binary accuracy.
pub const THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    BinaryCrossentropy,
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BinaryCrossentropy => "binary_crossentropy",
        }
    }

    pub fn compute(&self, y_true: &Array2<f32>, y_pred: &Array2<f32>) -> f32 {
        match self {
            Self::BinaryCrossentropy => binary_crossentropy(y_true, y_pred),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    BinaryAccuracy,
}

impl Metric {
    /// Key under which the metric appears in epoch logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BinaryAccuracy => "binary_accuracy",
        }
    }

    pub fn compute(&self, y_true: &Array2<f32>, y_pred: &Array2<f32>) -> f32 {
        match self {
            Self::BinaryAccuracy => binary_accuracy(y_true, y_pred),
        }
    }
}

/// Mean binary cross-entropy over the batch. An empty batch has zero loss.
pub fn binary_crossentropy(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> f32 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let total: f32 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(EPSILON, 1.0 - EPSILON);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / n as f32
}

/// Fraction of predictions on the same side of the threshold as the label.
pub fn binary_accuracy(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> f32 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|&(&y, &p)| (p > THRESHOLD) == (y > THRESHOLD))
        .count();
    correct as f32 / n as f32
}

//! Hyperparameter configuration.
//!
//! Values arrive as a loosely typed JSON object produced by the tuner. No
//! validation happens up front: each key is read (and type-checked) only at
//! the point where the model builder or the fit step needs it.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DENSE_UNITS: &str = "dense_units";
pub const NUM_LAYERS: &str = "num_layers";
pub const DROPOUT_RATE: &str = "dropout_rate";
pub const LEARNING_RATE: &str = "learning_rate";
pub const INITIAL_EPOCH: &str = "tuner/initial_epoch";

/// Tuner-selected hyperparameter values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParameters {
    values: Map<String, Value>,
}

impl HyperParameters {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    fn require(&self, key: &str) -> Result<&Value, MlError> {
        self.values
            .get(key)
            .ok_or_else(|| MlError::hyperparameter(format!("missing required key '{key}'")))
    }

    /// Read a non-negative integer. Integral floats (e.g. `16.0`) are accepted.
    pub fn require_usize(&self, key: &str) -> Result<usize, MlError> {
        let value = self.require(key)?;
        if let Some(n) = value.as_u64() {
            return Ok(n as usize);
        }
        match value.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
            _ => Err(MlError::hyperparameter(format!(
                "'{key}' must be a non-negative integer, got {value}"
            ))),
        }
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, MlError> {
        let value = self.require(key)?;
        value
            .as_f64()
            .ok_or_else(|| MlError::hyperparameter(format!("'{key}' must be a number, got {value}")))
    }

    pub fn dense_units(&self) -> Result<usize, MlError> {
        self.require_usize(DENSE_UNITS)
    }

    pub fn num_layers(&self) -> Result<usize, MlError> {
        self.require_usize(NUM_LAYERS)
    }

    pub fn dropout_rate(&self) -> Result<f64, MlError> {
        self.require_f64(DROPOUT_RATE)
    }

    pub fn learning_rate(&self) -> Result<f64, MlError> {
        self.require_f64(LEARNING_RATE)
    }

    /// Epoch count handed to `fit`.
    pub fn initial_epoch(&self) -> Result<usize, MlError> {
        self.require_usize(INITIAL_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> HyperParameters {
        serde_json::from_value(json!({
            "dense_units": 16,
            "num_layers": 2,
            "dropout_rate": 0.2,
            "learning_rate": 0.001,
            "tuner/initial_epoch": 1
        }))
        .unwrap()
    }

    #[test]
    fn test_typed_accessors() {
        let hp = sample();
        assert_eq!(hp.dense_units().unwrap(), 16);
        assert_eq!(hp.num_layers().unwrap(), 2);
        assert!((hp.dropout_rate().unwrap() - 0.2).abs() < 1e-12);
        assert!((hp.learning_rate().unwrap() - 0.001).abs() < 1e-12);
        assert_eq!(hp.initial_epoch().unwrap(), 1);
    }

    #[test]
    fn test_missing_key_fails_on_read() {
        let hp = HyperParameters::default().with(DENSE_UNITS, 8);
        assert_eq!(hp.dense_units().unwrap(), 8);
        let err = hp.num_layers().unwrap_err();
        assert!(err.to_string().contains("num_layers"));
    }

    #[test]
    fn test_integral_float_accepted() {
        let hp = HyperParameters::default().with(DENSE_UNITS, 32.0);
        assert_eq!(hp.dense_units().unwrap(), 32);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let hp = HyperParameters::default()
            .with(DENSE_UNITS, "wide")
            .with(LEARNING_RATE, json!([0.1]));
        assert!(matches!(
            hp.dense_units(),
            Err(MlError::Hyperparameter(_))
        ));
        assert!(hp.learning_rate().is_err());
        assert!(HyperParameters::default().with(NUM_LAYERS, 1.5).num_layers().is_err());
    }
}

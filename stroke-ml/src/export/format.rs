//! On-disk records of a saved model.

use crate::error::MlError;
use crate::nn::{Activation, CompileConfig, Dense, Dropout, InputSpec, Model};
use crate::serving::SignatureDef;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the layout of `saved_model.json` changes.
pub const FORMAT_VERSION: u32 = 1;

/// Contents of `saved_model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModelConfig {
    pub format_version: u32,
    pub name: String,
    pub inputs: Vec<InputSpec>,
    /// Layers after the concatenation, in call order.
    pub layers: Vec<LayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileConfig>,
    #[serde(default)]
    pub signatures: BTreeMap<String, SignatureDef>,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of `variables/variables.json`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", rename_all = "snake_case")]
pub enum LayerConfig {
    Dense {
        name: String,
        units: usize,
        activation: Activation,
    },
    Dropout {
        name: String,
        rate: f32,
    },
}

impl LayerConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Dense { name, .. } | Self::Dropout { name, .. } => name,
        }
    }
}

/// Weights of one dense layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseWeights {
    pub kernel: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Contents of `variables/variables.json`: layer name → weights.
pub type Variables = BTreeMap<String, DenseWeights>;

/// Split a model into its architecture and its weights.
pub(crate) fn describe(model: &Model) -> (Vec<LayerConfig>, Variables) {
    let dense_config = |d: &Dense| LayerConfig::Dense {
        name: d.name.clone(),
        units: d.units,
        activation: d.activation,
    };

    let mut layers: Vec<LayerConfig> = model.hidden_layers().iter().map(dense_config).collect();
    layers.push(LayerConfig::Dropout {
        name: model.dropout().name.clone(),
        rate: model.dropout().rate,
    });
    layers.push(dense_config(model.output_layer()));

    let variables = model
        .dense_layers()
        .map(|d| {
            (
                d.name.clone(),
                DenseWeights {
                    kernel: d.kernel.clone(),
                    bias: d.bias.clone(),
                },
            )
        })
        .collect();

    (layers, variables)
}

/// Rebuild an uncompiled model from its architecture and weights.
pub(crate) fn rebuild(
    config: &SavedModelConfig,
    mut variables: Variables,
) -> Result<Model, MlError> {
    let mut hidden = Vec::new();
    let mut dropout = None;
    let mut output = None;

    for layer in &config.layers {
        match layer {
            LayerConfig::Dense {
                name,
                units,
                activation,
            } => {
                let weights = variables
                    .remove(name)
                    .ok_or_else(|| MlError::export(format!("no weights stored for layer '{name}'")))?;
                let dense = Dense::from_weights(name, *activation, weights.kernel, weights.bias)?;
                if dense.units != *units {
                    return Err(MlError::export(format!(
                        "layer '{name}' declares {units} units, weights have {}",
                        dense.units
                    )));
                }
                if dropout.is_some() {
                    if output.is_some() {
                        return Err(MlError::export(format!(
                            "unexpected layer '{name}' after the output layer"
                        )));
                    }
                    output = Some(dense);
                } else {
                    hidden.push(dense);
                }
            }
            LayerConfig::Dropout { name, rate } => {
                if dropout.is_some() {
                    return Err(MlError::export(format!("second dropout layer '{name}'")));
                }
                dropout = Some(Dropout::new(name, f64::from(*rate))?);
            }
        }
    }

    if let Some(extra) = variables.keys().next() {
        return Err(MlError::export(format!(
            "weights stored for unknown layer '{extra}'"
        )));
    }
    let dropout = dropout.ok_or_else(|| MlError::export("saved model has no dropout layer"))?;
    let output = output.ok_or_else(|| MlError::export("saved model has no output layer"))?;
    Model::new(&config.name, config.inputs.clone(), hidden, dropout, output)
}

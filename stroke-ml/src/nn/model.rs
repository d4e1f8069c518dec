//! The feed-forward binary classifier.
//!
//! Topology is fixed: named inputs are concatenated, passed through a
//! stack of dense layers, a dropout layer and a single sigmoid unit.
//! Gradients are computed by hand for exactly this topology.

use crate::dataset::Batch;
use crate::error::MlError;
use crate::nn::activation::Activation;
use crate::nn::layers::{Dense, Dropout, InputSpec};
use crate::nn::loss::{Loss, Metric};
use crate::nn::optimizer::{Adam, AdamConfig};
use crate::transform::{TransformLayer, TransformedFeatures};
use ndarray::{Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Optimizer, loss and metrics attached by [`Model::compile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub optimizer: AdamConfig,
    pub loss: Loss,
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone)]
struct Compiled {
    config: CompileConfig,
    optimizer: Adam,
    rng: StdRng,
}

/// Loss and metric values for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMetrics {
    pub loss: f32,
    pub metrics: Vec<(Metric, f32)>,
}

/// Description of one node in the layer graph, for summaries and plots.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub class_name: &'static str,
    pub input_shapes: Vec<Vec<Option<usize>>>,
    pub output_shape: Vec<Option<usize>>,
    pub params: usize,
    pub inbound: Vec<String>,
}

/// Name given to the concatenation node.
pub const CONCATENATE: &str = "concatenate";

#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    inputs: Vec<InputSpec>,
    hidden: Vec<Dense>,
    dropout: Dropout,
    output: Dense,
    compiled: Option<Compiled>,
    /// Transform layer attached for serving.
    pub tft_layer: Option<TransformLayer>,
}

impl Model {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<InputSpec>,
        hidden: Vec<Dense>,
        dropout: Dropout,
        output: Dense,
    ) -> Result<Self, MlError> {
        if inputs.is_empty() {
            return Err(MlError::model("a model needs at least one input"));
        }
        if output.units != 1 || output.activation != Activation::Sigmoid {
            return Err(MlError::model(format!(
                "output layer '{}' must be a single sigmoid unit",
                output.name
            )));
        }

        let mut width: usize = inputs.iter().map(|i| i.width).sum();
        for layer in hidden.iter().chain(std::iter::once(&output)) {
            if layer.input_dim() != width {
                return Err(MlError::shape(format!(
                    "layer '{}' expects {} inputs, previous layer produces {width}",
                    layer.name,
                    layer.input_dim()
                )));
            }
            width = layer.units;
        }

        Ok(Self {
            name: name.into(),
            inputs,
            hidden,
            dropout,
            output,
            compiled: None,
            tft_layer: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn hidden_layers(&self) -> &[Dense] {
        &self.hidden
    }

    pub fn dropout(&self) -> &Dropout {
        &self.dropout
    }

    pub fn output_layer(&self) -> &Dense {
        &self.output
    }

    /// Hidden layers followed by the output layer.
    pub fn dense_layers(&self) -> impl Iterator<Item = &Dense> {
        self.hidden.iter().chain(std::iter::once(&self.output))
    }

    pub fn concat_width(&self) -> usize {
        self.inputs.iter().map(|i| i.width).sum()
    }

    pub fn count_params(&self) -> usize {
        self.dense_layers().map(Dense::param_count).sum()
    }

    pub fn compile(&mut self, config: CompileConfig, seed: u64) {
        self.compiled = Some(Compiled {
            optimizer: Adam::from_config(config.optimizer),
            config,
            rng: StdRng::seed_from_u64(seed),
        });
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compile_config(&self) -> Option<&CompileConfig> {
        self.compiled.as_ref().map(|c| &c.config)
    }

    /// Optimizer steps taken so far.
    pub fn optimizer_iterations(&self) -> u64 {
        self.compiled
            .as_ref()
            .map(|c| c.optimizer.iterations())
            .unwrap_or(0)
    }

    pub fn attach_transform_layer(&mut self, layer: TransformLayer) {
        self.tft_layer = Some(layer);
    }

    /// Concatenate named inputs in declaration order.
    pub fn concatenate(&self, features: &TransformedFeatures) -> Result<Array2<f32>, MlError> {
        let mut views: Vec<ArrayView2<'_, f32>> = Vec::with_capacity(self.inputs.len());
        let mut batch = None;
        for input in &self.inputs {
            let array = features
                .get(&input.name)
                .ok_or_else(|| MlError::shape(format!("missing model input '{}'", input.name)))?;
            if array.ncols() != input.width {
                return Err(MlError::shape(format!(
                    "input '{}' expects width {}, got {}",
                    input.name,
                    input.width,
                    array.ncols()
                )));
            }
            match batch {
                None => batch = Some(array.nrows()),
                Some(rows) if rows != array.nrows() => {
                    return Err(MlError::shape(format!(
                        "input '{}' has {} rows, expected {rows}",
                        input.name,
                        array.nrows()
                    )));
                }
                Some(_) => {}
            }
            views.push(array.view());
        }
        Ok(ndarray::concatenate(Axis(1), &views)?)
    }

    /// Inference-mode forward pass: dropout is the identity.
    pub fn predict(&self, features: &TransformedFeatures) -> Result<Array2<f32>, MlError> {
        let mut x = self.concatenate(features)?;
        for layer in &self.hidden {
            x = layer.forward(&x)?;
        }
        self.output.forward(&x)
    }

    fn compiled(&self) -> Result<&Compiled, MlError> {
        self.compiled
            .as_ref()
            .ok_or_else(|| MlError::model(format!("model '{}' is not compiled", self.name)))
    }

    fn check_labels(labels: &Array2<f32>, predictions: &Array2<f32>) -> Result<(), MlError> {
        if labels.shape() != predictions.shape() {
            return Err(MlError::shape(format!(
                "labels have shape {:?}, predictions {:?}",
                labels.shape(),
                predictions.shape()
            )));
        }
        Ok(())
    }

    fn score(config: &CompileConfig, labels: &Array2<f32>, predictions: &Array2<f32>) -> BatchMetrics {
        BatchMetrics {
            loss: config.loss.compute(labels, predictions),
            metrics: config
                .metrics
                .iter()
                .map(|m| (*m, m.compute(labels, predictions)))
                .collect(),
        }
    }

    /// Evaluate loss and metrics on a batch without updating weights.
    pub fn test_on_batch(&self, batch: &Batch) -> Result<BatchMetrics, MlError> {
        let compiled = self.compiled()?;
        let predictions = self.predict(&batch.features)?;
        Self::check_labels(&batch.labels, &predictions)?;
        Ok(Self::score(&compiled.config, &batch.labels, &predictions))
    }

    /// One optimizer step on a batch. Returns the pre-update loss and metrics.
    pub fn train_on_batch(&mut self, batch: &Batch) -> Result<BatchMetrics, MlError> {
        let x = self.concatenate(&batch.features)?;
        let Self {
            name,
            hidden,
            dropout,
            output,
            compiled,
            ..
        } = self;
        let compiled = compiled
            .as_mut()
            .ok_or_else(|| MlError::model(format!("model '{name}' is not compiled")))?;

        // Forward, keeping every activation for the backward pass.
        let mut activations = Vec::with_capacity(hidden.len() + 1);
        activations.push(x);
        for layer in hidden.iter() {
            let next = layer.forward(&activations[activations.len() - 1])?;
            activations.push(next);
        }
        let last = &activations[activations.len() - 1];
        let mask = dropout.sample_mask(last.dim(), &mut compiled.rng);
        let dropped = last * &mask;
        let predictions = output.forward(&dropped)?;
        Self::check_labels(&batch.labels, &predictions)?;
        let scored = Self::score(&compiled.config, &batch.labels, &predictions);

        // Sigmoid output with binary cross-entropy: dL/dz = (p - y) / n.
        let n = predictions.nrows().max(1) as f32;
        let dz_out = (&predictions - &batch.labels) / n;
        let grad_out_kernel = dropped.t().dot(&dz_out);
        let grad_out_bias = dz_out.sum_axis(Axis(0));

        let mut da = dz_out.dot(&output.kernel.t()) * &mask;
        let mut grads = Vec::with_capacity(hidden.len());
        for i in (0..hidden.len()).rev() {
            let dz = da * hidden[i].activation.derivative_from_output(&activations[i + 1]);
            let grad_kernel = activations[i].t().dot(&dz);
            let grad_bias = dz.sum_axis(Axis(0));
            da = dz.dot(&hidden[i].kernel.t());
            grads.push((grad_kernel, grad_bias));
        }
        grads.reverse();

        let optimizer = &mut compiled.optimizer;
        optimizer.begin_step();
        for (i, (layer, (grad_kernel, grad_bias))) in hidden.iter_mut().zip(grads).enumerate() {
            optimizer.update(2 * i, &mut layer.kernel, &grad_kernel);
            optimizer.update(2 * i + 1, &mut layer.bias, &grad_bias);
        }
        let slot = 2 * hidden.len();
        optimizer.update(slot, &mut output.kernel, &grad_out_kernel);
        optimizer.update(slot + 1, &mut output.bias, &grad_out_bias);

        Ok(scored)
    }

    /// Every node in the layer graph, inputs first.
    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut layers: Vec<LayerInfo> = self
            .inputs
            .iter()
            .map(|input| LayerInfo {
                name: input.name.clone(),
                class_name: "InputLayer",
                input_shapes: vec![vec![None, Some(input.width)]],
                output_shape: vec![None, Some(input.width)],
                params: 0,
                inbound: Vec::new(),
            })
            .collect();

        let concat_width = self.concat_width();
        layers.push(LayerInfo {
            name: CONCATENATE.to_string(),
            class_name: "Concatenate",
            input_shapes: self
                .inputs
                .iter()
                .map(|i| vec![None, Some(i.width)])
                .collect(),
            output_shape: vec![None, Some(concat_width)],
            params: 0,
            inbound: self.inputs.iter().map(|i| i.name.clone()).collect(),
        });

        let mut previous = CONCATENATE.to_string();
        let mut width = concat_width;
        for layer in &self.hidden {
            layers.push(LayerInfo {
                name: layer.name.clone(),
                class_name: "Dense",
                input_shapes: vec![vec![None, Some(width)]],
                output_shape: vec![None, Some(layer.units)],
                params: layer.param_count(),
                inbound: vec![previous],
            });
            previous = layer.name.clone();
            width = layer.units;
        }

        layers.push(LayerInfo {
            name: self.dropout.name.clone(),
            class_name: "Dropout",
            input_shapes: vec![vec![None, Some(width)]],
            output_shape: vec![None, Some(width)],
            params: 0,
            inbound: vec![previous],
        });

        layers.push(LayerInfo {
            name: self.output.name.clone(),
            class_name: "Dense",
            input_shapes: vec![vec![None, Some(width)]],
            output_shape: vec![None, Some(self.output.units)],
            params: self.output.param_count(),
            inbound: vec![self.dropout.name.clone()],
        });

        layers
    }

    /// Layer table in the familiar `Layer (type) | Output Shape | Param #` form.
    pub fn summary(&self) -> String {
        let rule = "_".repeat(98);
        let double = "=".repeat(98);
        let mut out = String::new();
        let _ = writeln!(out, "Model: \"{}\"", self.name);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            " {:<30} {:<20} {:<11} Connected to",
            "Layer (type)", "Output Shape", "Param #"
        );
        let _ = writeln!(out, "{double}");
        for layer in self.layers() {
            let inbound = layer
                .inbound
                .iter()
                .map(|n| format!("'{n}[0][0]'"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                " {:<30} {:<20} {:<11} [{inbound}]",
                format!("{} ({})", layer.name, layer.class_name),
                format_shape(&layer.output_shape),
                layer.params
            );
        }
        let _ = writeln!(out, "{double}");
        let total = self.count_params();
        let _ = writeln!(out, "Total params: {total}");
        let _ = writeln!(out, "Trainable params: {total}");
        let _ = writeln!(out, "Non-trainable params: 0");
        let _ = write!(out, "{rule}");
        out
    }
}

/// `(None, 16)`-style shape rendering.
pub fn format_shape(shape: &[Option<usize>]) -> String {
    let dims = shape
        .iter()
        .map(|d| d.map_or_else(|| "None".to_string(), |v| v.to_string()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("({dims})")
}

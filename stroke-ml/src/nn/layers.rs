//! Layer definitions.

use crate::error::MlError;
use crate::nn::activation::Activation;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A named model input of fixed width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub width: usize,
}

/// Fully connected layer: `activation(x · kernel + bias)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub name: String,
    pub units: usize,
    pub activation: Activation,
    /// `[input_dim, units]`
    pub kernel: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Dense {
    /// Glorot-uniform kernel, zero bias.
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        input_dim: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, MlError> {
        let name = name.into();
        if units == 0 {
            return Err(MlError::hyperparameter(format!(
                "layer '{name}': units must be a positive integer, got 0"
            )));
        }
        if input_dim == 0 {
            return Err(MlError::shape(format!(
                "layer '{name}': input dimension must be positive"
            )));
        }
        let limit = (6.0 / (input_dim + units) as f32).sqrt();
        let kernel = Array2::from_shape_fn((input_dim, units), |_| rng.gen_range(-limit..limit));
        Ok(Self {
            name,
            units,
            activation,
            kernel,
            bias: Array1::zeros(units),
        })
    }

    /// Rebuild a layer from stored weights.
    pub fn from_weights(
        name: impl Into<String>,
        activation: Activation,
        kernel: Array2<f32>,
        bias: Array1<f32>,
    ) -> Result<Self, MlError> {
        let name = name.into();
        let units = kernel.ncols();
        if bias.len() != units {
            return Err(MlError::shape(format!(
                "layer '{name}': bias has {} entries, kernel has {units} columns",
                bias.len()
            )));
        }
        Ok(Self {
            name,
            units,
            activation,
            kernel,
            bias,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    /// Pre-activation output.
    pub fn linear(&self, x: &Array2<f32>) -> Result<Array2<f32>, MlError> {
        if x.ncols() != self.input_dim() {
            return Err(MlError::shape(format!(
                "layer '{}' expects {} features, got {}",
                self.name,
                self.input_dim(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.kernel) + &self.bias.view().insert_axis(Axis(0)))
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>, MlError> {
        Ok(self.activation.apply(&self.linear(x)?))
    }
}

/// Inverted dropout: active only during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropout {
    pub name: String,
    pub rate: f32,
}

impl Dropout {
    pub fn new(name: impl Into<String>, rate: f64) -> Result<Self, MlError> {
        let name = name.into();
        if !(0.0..1.0).contains(&rate) {
            return Err(MlError::hyperparameter(format!(
                "layer '{name}': dropout rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self {
            name,
            rate: rate as f32,
        })
    }

    /// Sample a mask of `0` or `1 / (1 - rate)` entries.
    pub fn sample_mask<R: Rng + ?Sized>(&self, shape: (usize, usize), rng: &mut R) -> Array2<f32> {
        if self.rate == 0.0 {
            return Array2::ones(shape);
        }
        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        Array2::from_shape_fn(shape, |_| if rng.r#gen::<f32>() < keep { scale } else { 0.0 })
    }
}

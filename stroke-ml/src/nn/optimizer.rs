//! Adam optimizer (Adaptive Moment Estimation).

use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

/// Adam hyperparameters, as persisted with a compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

/// Adam with per-slot first and second moment buffers.
///
/// Call [`Adam::begin_step`] once per batch, then [`Adam::update`] once per
/// parameter tensor with a stable slot index.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    t: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self::from_config(AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        })
    }

    pub fn from_config(config: AdamConfig) -> Self {
        Self {
            config,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with default moment decay rates.
    pub fn default_params(learning_rate: f32) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-7)
    }

    pub fn config(&self) -> AdamConfig {
        self.config
    }

    pub fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    pub fn iterations(&self) -> u64 {
        self.t
    }

    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Apply one update to `param` given its gradient.
    pub fn update<D: Dimension>(
        &mut self,
        slot: usize,
        param: &mut Array<f32, D>,
        grad: &Array<f32, D>,
    ) {
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;

        if self.m.len() <= slot {
            self.m.resize_with(slot + 1, Vec::new);
            self.v.resize_with(slot + 1, Vec::new);
        }
        if self.m[slot].len() != param.len() {
            self.m[slot] = vec![0.0; param.len()];
            self.v[slot] = vec![0.0; param.len()];
        }

        let t = self.t.max(1) as i32;
        let lr_t = learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        let m = &mut self.m[slot];
        let v = &mut self.v[slot];
        for (i, (p, &g)) in param.iter_mut().zip(grad.iter()).enumerate() {
            // m_t = β1 * m_{t-1} + (1 - β1) * g
            m[i] = beta1 * m[i] + (1.0 - beta1) * g;
            // v_t = β2 * v_{t-1} + (1 - β2) * g²
            v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
            // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
            *p -= lr_t * m[i] / (v[i].sqrt() + epsilon);
        }
    }
}

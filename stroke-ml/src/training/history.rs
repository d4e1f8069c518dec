//! Per-epoch training history.

use crate::training::logs::{Logs, MonitorMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What `fit` returns: every epoch's logs plus how training ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Zero-based indices of completed epochs.
    pub epochs: Vec<usize>,
    /// Metric name → one value per completed epoch.
    pub history: BTreeMap<String, Vec<f64>>,
    /// Epoch at which a callback requested a stop.
    pub stopped_epoch: Option<usize>,
    pub total_training_time_secs: f64,
}

impl History {
    pub fn record_epoch(&mut self, epoch: usize, logs: &Logs) {
        self.epochs.push(epoch);
        for (name, value) in logs {
            self.history.entry(name.clone()).or_default().push(*value);
        }
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs.len()
    }

    pub fn get(&self, metric: &str) -> Option<&[f64]> {
        self.history.get(metric).map(Vec::as_slice)
    }

    pub fn last(&self, metric: &str) -> Option<f64> {
        self.get(metric).and_then(|v| v.last().copied())
    }

    /// `(epoch, value)` of the best value of `metric`.
    pub fn best(&self, metric: &str, mode: MonitorMode) -> Option<(usize, f64)> {
        let mode = mode.resolve(metric);
        let values = self.get(metric)?;
        let mut best: Option<(usize, f64)> = None;
        for (epoch, value) in self.epochs.iter().zip(values) {
            let better = match best {
                None => true,
                Some((_, b)) => mode.is_improvement(*value, b, 0.0),
            };
            if better {
                best = Some((*epoch, *value));
            }
        }
        best
    }
}

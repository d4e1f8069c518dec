//! Metric logs passed between the fit loop and callbacks.

use std::collections::BTreeMap;

pub use stroke_core::MonitorMode;

/// Metric name → value, e.g. `loss`, `binary_accuracy`, `val_loss`.
pub type Logs = BTreeMap<String, f64>;

pub const LOSS: &str = "loss";
pub const VALIDATION_PREFIX: &str = "val_";

/// Key of a metric evaluated on validation data.
pub fn validation_key(name: &str) -> String {
    format!("{VALIDATION_PREFIX}{name}")
}

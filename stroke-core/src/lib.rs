//! # stroke-core
//!
//! Shared foundation for the stroke-trainer workspace: layered
//! configuration, the core error type, and atomic persistence helpers used
//! by the model export and checkpoint paths.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    ExportConfig, LogUpdateFreq, MonitorMode, TrainerConfig, TrainingConfig, load_config,
};
pub use error::{CoreError, Result};

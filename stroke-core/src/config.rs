//! Configuration system for stroke-trainer.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/stroke-trainer/config.toml` and/or
//! `.stroke/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// How often the metric logger writes scalars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogUpdateFreq {
    #[default]
    Batch,
    Epoch,
}

/// Direction in which a monitored metric improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    Min,
    Max,
    /// Max for accuracy-like metrics, min otherwise.
    #[default]
    Auto,
}

impl MonitorMode {
    /// Resolve `Auto` against the monitored metric name.
    pub fn resolve(self, monitor: &str) -> Self {
        match self {
            Self::Auto if monitor.contains("acc") || monitor.starts_with("fmeasure") => Self::Max,
            Self::Auto => Self::Min,
            mode => mode,
        }
    }

    /// Worst possible starting value.
    pub fn initial_best(self) -> f64 {
        match self {
            Self::Max => f64::NEG_INFINITY,
            _ => f64::INFINITY,
        }
    }

    /// Whether `current` beats `best` by more than `min_delta`.
    pub fn is_improvement(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Self::Max => current - min_delta > best,
            _ => current + min_delta < best,
        }
    }
}

/// Fit-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Examples per batch for both train and eval datasets.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seed for weight init, shuffling and dropout masks.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Epochs without improvement before early stopping fires.
    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,
    /// Metric watched by early stopping and checkpointing.
    #[serde(default = "default_monitor")]
    pub monitor: String,
    /// Direction in which `monitor` improves.
    #[serde(default = "default_monitor_mode")]
    pub monitor_mode: MonitorMode,
    #[serde(default)]
    pub log_update_freq: LogUpdateFreq,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            seed: default_seed(),
            early_stopping_patience: default_patience(),
            monitor: default_monitor(),
            monitor_mode: default_monitor_mode(),
            log_update_freq: LogUpdateFreq::Batch,
        }
    }
}

fn default_batch_size() -> usize {
    64
}

fn default_seed() -> u64 {
    42
}

fn default_patience() -> usize {
    10
}

fn default_monitor() -> String {
    "val_binary_accuracy".to_string()
}

fn default_monitor_mode() -> MonitorMode {
    MonitorMode::Max
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Architecture diagram target, relative to the working directory.
    #[serde(default = "default_model_plot_path")]
    pub model_plot_path: PathBuf,
    /// Log the layer summary when the model is built.
    #[serde(default = "default_true")]
    pub show_summary: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            model_plot_path: default_model_plot_path(),
            show_summary: true,
        }
    }
}

fn default_model_plot_path() -> PathBuf {
    PathBuf::from("images/model_plot.png")
}

fn default_true() -> bool {
    true
}

/// Platform config directory for stroke-trainer, if one can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "stroke", "stroke-trainer")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `STROKE_`)
/// 3. Workspace-local config (`.stroke/config.toml`)
/// 4. User config (`~/.config/stroke-trainer/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TrainerConfig>,
) -> Result<TrainerConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainerConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            tracing::debug!(path = %user_config.display(), "Merging user config");
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".stroke").join("config.toml");
        if ws_config.exists() {
            tracing::debug!(path = %ws_config.display(), "Merging workspace config");
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // STROKE_TRAINING__BATCH_SIZE, STROKE_EXPORT__MODEL_PLOT_PATH, ...
    figment = figment.merge(Env::prefixed("STROKE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Render a config as TOML for display.
pub fn to_toml(config: &TrainerConfig) -> crate::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

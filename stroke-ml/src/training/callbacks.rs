//! Training callbacks: metric logging, early stopping and checkpointing.

use crate::error::MlError;
use crate::export;
use crate::nn::Model;
use crate::serving::Signatures;
use crate::training::logs::{Logs, MonitorMode};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use stroke_core::LogUpdateFreq;

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hooks invoked by [`Model::fit`](crate::nn::Model::fit).
///
/// Every callback sees every event; a `Stop` from `on_epoch_end` ends
/// training after all callbacks have run for that epoch.
pub trait Callback: Send {
    fn name(&self) -> &str;

    fn on_train_begin(&mut self, _model: &Model) -> Result<(), MlError> {
        Ok(())
    }

    /// `logs` hold running means for the current epoch.
    fn on_train_batch_end(&mut self, _step: usize, _logs: &Logs) -> Result<(), MlError> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        _logs: &Logs,
        _model: &Model,
    ) -> Result<CallbackAction, MlError> {
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _logs: &Logs) -> Result<(), MlError> {
        Ok(())
    }
}

/// Early stopping on a monitored metric.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub monitor: String,
    pub mode: MonitorMode,
    pub patience: usize,
    pub min_delta: f64,
    pub verbose: bool,
    wait: usize,
    best: f64,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, mode: MonitorMode, patience: usize) -> Self {
        let monitor = monitor.into();
        let mode = mode.resolve(&monitor);
        Self {
            best: mode.initial_best(),
            monitor,
            mode,
            patience,
            min_delta: 0.0,
            verbose: false,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Core decision given the monitored value for `epoch`.
    ///
    /// An improving epoch never stops training, whatever the patience.
    pub fn observe(&mut self, epoch: usize, current: f64) -> CallbackAction {
        self.wait += 1;
        if self.mode.is_improvement(current, self.best, self.min_delta) {
            self.best = current;
            self.wait = 0;
            return CallbackAction::Continue;
        }
        if self.wait >= self.patience && epoch > 0 {
            self.stopped_epoch = Some(epoch);
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

impl Callback for EarlyStopping {
    fn name(&self) -> &str {
        "EarlyStopping"
    }

    fn on_train_begin(&mut self, _model: &Model) -> Result<(), MlError> {
        self.wait = 0;
        self.best = self.mode.initial_best();
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &Logs,
        _model: &Model,
    ) -> Result<CallbackAction, MlError> {
        let Some(current) = logs.get(&self.monitor).copied() else {
            tracing::warn!(
                monitor = %self.monitor,
                available = ?logs.keys().collect::<Vec<_>>(),
                "Early stopping conditioned on a metric that is not available"
            );
            return Ok(CallbackAction::Continue);
        };
        Ok(self.observe(epoch, current))
    }

    fn on_train_end(&mut self, _logs: &Logs) -> Result<(), MlError> {
        if let (Some(epoch), true) = (self.stopped_epoch, self.verbose) {
            tracing::info!(epoch = epoch + 1, "Epoch {}: early stopping", epoch + 1);
        }
        Ok(())
    }
}

/// Saves the model whenever the monitored metric improves (or every epoch
/// when `save_best_only` is off).
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    pub filepath: PathBuf,
    pub monitor: String,
    pub mode: MonitorMode,
    pub save_best_only: bool,
    pub verbose: bool,
    best: f64,
    saves: usize,
}

impl ModelCheckpoint {
    pub fn new(filepath: impl Into<PathBuf>, monitor: impl Into<String>, mode: MonitorMode) -> Self {
        let monitor = monitor.into();
        let mode = mode.resolve(&monitor);
        Self {
            filepath: filepath.into(),
            best: mode.initial_best(),
            monitor,
            mode,
            save_best_only: false,
            verbose: false,
            saves: 0,
        }
    }

    pub fn save_best_only(mut self, save_best_only: bool) -> Self {
        self.save_best_only = save_best_only;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Number of times the model has been written.
    pub fn saves(&self) -> usize {
        self.saves
    }

    fn save(&mut self, model: &Model) -> Result<(), MlError> {
        export::save_model(model, &self.filepath, &Signatures::new())?;
        self.saves += 1;
        Ok(())
    }
}

impl Callback for ModelCheckpoint {
    fn name(&self) -> &str {
        "ModelCheckpoint"
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &Logs,
        model: &Model,
    ) -> Result<CallbackAction, MlError> {
        if !self.save_best_only {
            if self.verbose {
                tracing::info!(
                    path = %self.filepath.display(),
                    "Epoch {}: saving model", epoch + 1
                );
            }
            self.save(model)?;
            return Ok(CallbackAction::Continue);
        }

        let Some(current) = logs.get(&self.monitor).copied() else {
            tracing::warn!(
                monitor = %self.monitor,
                "Can save best model only with the monitored metric available, skipping"
            );
            return Ok(CallbackAction::Continue);
        };

        if self.mode.is_improvement(current, self.best, 0.0) {
            if self.verbose {
                tracing::info!(
                    path = %self.filepath.display(),
                    "Epoch {}: {} improved from {:.5} to {:.5}, saving model",
                    epoch + 1,
                    self.monitor,
                    self.best,
                    current
                );
            }
            self.best = current;
            self.save(model)?;
        } else if self.verbose {
            tracing::info!(
                "Epoch {}: {} did not improve from {:.5}",
                epoch + 1,
                self.monitor,
                self.best
            );
        }
        Ok(CallbackAction::Continue)
    }
}

/// One scalar (or text) event in a metric log.
#[derive(Debug, Serialize)]
struct Event<'a> {
    wall_time: f64,
    step: usize,
    tag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

struct EventWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl EventWriter {
    fn open(dir: &Path, run_id: &str) -> Result<Self, MlError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("events.{run_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    fn scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<(), MlError> {
        self.write(&Event {
            wall_time: wall_time(),
            step,
            tag,
            value: Some(value),
            text: None,
        })
    }

    fn text(&mut self, step: usize, tag: &str, text: &str) -> Result<(), MlError> {
        self.write(&Event {
            wall_time: wall_time(),
            step,
            tag,
            value: None,
            text: Some(text),
        })
    }

    fn write(&mut self, event: &Event<'_>) -> Result<(), MlError> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

fn wall_time() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Writes training and validation scalars as JSON-lines event logs under
/// `<log_dir>/train` and `<log_dir>/validation`.
pub struct MetricLogger {
    pub log_dir: PathBuf,
    pub update_freq: LogUpdateFreq,
    run_id: String,
    train: Option<EventWriter>,
    validation: Option<EventWriter>,
    global_step: usize,
}

impl MetricLogger {
    pub fn new(log_dir: impl Into<PathBuf>, update_freq: LogUpdateFreq) -> Self {
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            log_dir: log_dir.into(),
            update_freq,
            run_id: format!("{}.{}", Utc::now().format("%Y%m%dT%H%M%S"), &short_id[..8]),
            train: None,
            validation: None,
            global_step: 0,
        }
    }

    pub fn train_log_path(&self) -> Option<&Path> {
        self.train.as_ref().map(|w| w.path.as_path())
    }

    pub fn validation_log_path(&self) -> Option<&Path> {
        self.validation.as_ref().map(|w| w.path.as_path())
    }

    fn writers(&mut self) -> Result<(&mut EventWriter, &mut EventWriter), MlError> {
        match (self.train.as_mut(), self.validation.as_mut()) {
            (Some(train), Some(validation)) => Ok((train, validation)),
            _ => Err(MlError::training("metric logger used before training began")),
        }
    }
}

impl Callback for MetricLogger {
    fn name(&self) -> &str {
        "MetricLogger"
    }

    fn on_train_begin(&mut self, model: &Model) -> Result<(), MlError> {
        let mut train = EventWriter::open(&self.log_dir.join("train"), &self.run_id)?;
        let validation = EventWriter::open(&self.log_dir.join("validation"), &self.run_id)?;
        train.text(0, "model_summary", &model.summary())?;
        tracing::debug!(path = %train.path.display(), "Writing training event log");
        self.train = Some(train);
        self.validation = Some(validation);
        self.global_step = 0;
        Ok(())
    }

    fn on_train_batch_end(&mut self, _step: usize, logs: &Logs) -> Result<(), MlError> {
        let step = self.global_step;
        self.global_step += 1;
        if self.update_freq != LogUpdateFreq::Batch {
            return Ok(());
        }
        let (train, _) = self.writers()?;
        for (name, value) in logs {
            train.scalar(step, &format!("batch_{name}"), *value)?;
        }
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &Logs,
        _model: &Model,
    ) -> Result<CallbackAction, MlError> {
        let (train, validation) = self.writers()?;
        for (name, value) in logs {
            match name.strip_prefix(crate::training::logs::VALIDATION_PREFIX) {
                Some(base) => validation.scalar(epoch, &format!("epoch_{base}"), *value)?,
                None => train.scalar(epoch, &format!("epoch_{name}"), *value)?,
            }
        }
        train.out.flush()?;
        validation.out.flush()?;
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _logs: &Logs) -> Result<(), MlError> {
        for writer in [self.train.as_mut(), self.validation.as_mut()]
            .into_iter()
            .flatten()
        {
            writer.out.flush()?;
        }
        Ok(())
    }
}

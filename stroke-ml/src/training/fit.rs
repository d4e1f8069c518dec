//! The epoch/step loop behind [`Model::fit`].

use crate::dataset::Dataset;
use crate::error::MlError;
use crate::nn::Model;
use crate::nn::model::BatchMetrics;
use crate::training::callbacks::{Callback, CallbackAction};
use crate::training::history::History;
use crate::training::logs::{LOSS, Logs, validation_key};
use std::time::Instant;

/// Loop bounds for [`Model::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    /// Log a line per epoch at info level.
    pub verbose: bool,
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), MlError> {
        if self.steps_per_epoch == 0 {
            return Err(MlError::training("steps_per_epoch must be positive"));
        }
        Ok(())
    }
}

/// Running mean of batch losses and metrics.
#[derive(Debug, Default)]
struct RunningMeans {
    sums: Logs,
    count: usize,
}

impl RunningMeans {
    fn add(&mut self, scored: &BatchMetrics) {
        self.count += 1;
        *self.sums.entry(LOSS.to_string()).or_insert(0.0) += f64::from(scored.loss);
        for (metric, value) in &scored.metrics {
            *self.sums.entry(metric.name().to_string()).or_insert(0.0) += f64::from(*value);
        }
    }

    fn means(&self) -> Logs {
        let n = self.count.max(1) as f64;
        self.sums.iter().map(|(k, v)| (k.clone(), v / n)).collect()
    }
}

impl Model {
    /// Train for `options.epochs` epochs of `options.steps_per_epoch`
    /// batches, validating after each epoch when `validation` is given.
    ///
    /// Training ends early when any callback returns
    /// [`CallbackAction::Stop`]; every callback still sees that epoch.
    pub fn fit(
        &mut self,
        train: &mut Dataset,
        mut validation: Option<&mut Dataset>,
        options: &FitOptions,
        callbacks: &mut [Box<dyn Callback>],
    ) -> Result<History, MlError> {
        options.validate()?;
        if !self.is_compiled() {
            return Err(MlError::model(format!(
                "model '{}' must be compiled before fit",
                self.name()
            )));
        }

        let started = Instant::now();
        let mut history = History::default();
        let mut last_logs = Logs::new();

        for callback in callbacks.iter_mut() {
            callback.on_train_begin(self)?;
        }

        for epoch in 0..options.epochs {
            let mut running = RunningMeans::default();
            for step in 0..options.steps_per_epoch {
                let batch = train.next_batch();
                let scored = self.train_on_batch(&batch)?;
                running.add(&scored);
                let logs = running.means();
                for callback in callbacks.iter_mut() {
                    callback.on_train_batch_end(step, &logs)?;
                }
            }

            let mut logs = running.means();
            if let Some(dataset) = validation.as_deref_mut() {
                for (name, value) in self.evaluate(dataset, options.validation_steps)? {
                    logs.insert(validation_key(&name), value);
                }
            }

            if options.verbose {
                let rendered = logs
                    .iter()
                    .map(|(k, v)| format!("{k}: {v:.4}"))
                    .collect::<Vec<_>>()
                    .join(" - ");
                tracing::info!(
                    epoch = epoch + 1,
                    epochs = options.epochs,
                    "Epoch {}/{} - {rendered}",
                    epoch + 1,
                    options.epochs
                );
            }

            history.record_epoch(epoch, &logs);

            let mut stop = false;
            for callback in callbacks.iter_mut() {
                if callback.on_epoch_end(epoch, &logs, self)? == CallbackAction::Stop {
                    tracing::debug!(callback = callback.name(), epoch, "Callback requested stop");
                    stop = true;
                }
            }
            last_logs = logs;
            if stop {
                history.stopped_epoch = Some(epoch);
                break;
            }
        }

        for callback in callbacks.iter_mut() {
            callback.on_train_end(&last_logs)?;
        }

        history.total_training_time_secs = started.elapsed().as_secs_f64();
        Ok(history)
    }

    /// Mean loss and metrics over `steps` batches, without updating weights.
    pub fn evaluate(&self, dataset: &mut Dataset, steps: usize) -> Result<Logs, MlError> {
        if steps == 0 {
            return Err(MlError::training("evaluation steps must be positive"));
        }
        let mut running = RunningMeans::default();
        for _ in 0..steps {
            let batch = dataset.next_batch();
            running.add(&self.test_on_batch(&batch)?);
        }
        Ok(running.means())
    }
}

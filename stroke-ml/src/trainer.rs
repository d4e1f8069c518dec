//! The training driver: `run_fn`.

use crate::builder::get_model_with_seed;
use crate::dataset::input_fn_with_seed;
use crate::error::MlError;
use crate::hparams::HyperParameters;
use crate::plot::{PlotOptions, plot_model};
use crate::serving::{
    EXAMPLES_INPUT, SERVING_DEFAULT, Signatures, TensorSpec, get_serve_examples_fn,
};
use crate::training::{Callback, EarlyStopping, FitOptions, History, MetricLogger, ModelCheckpoint};
use crate::transform::TransformOutput;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stroke_core::TrainerConfig;

/// Name of the metric log directory, a sibling of the serving model dir.
pub const LOG_DIR_NAME: &str = "logs";

/// Hyperparameters as handed over by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperParameterBundle {
    pub values: HyperParameters,
}

/// Arguments for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnArgs {
    pub hyperparameters: HyperParameterBundle,
    pub serving_model_dir: PathBuf,
    /// Transform output directory or descriptor file.
    pub transform_output: PathBuf,
    pub train_files: Vec<PathBuf>,
    pub eval_files: Vec<PathBuf>,
    pub train_steps: usize,
    pub eval_steps: usize,
}

impl FnArgs {
    /// `<parent of serving_model_dir>/logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.serving_model_dir
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(LOG_DIR_NAME)
    }
}

/// Train the model according to `fn_args` with default settings.
pub fn run_fn(fn_args: &FnArgs) -> Result<History, MlError> {
    run_fn_with_config(fn_args, &TrainerConfig::default())
}

/// Train, export the servable model and render its diagram.
pub fn run_fn_with_config(fn_args: &FnArgs, config: &TrainerConfig) -> Result<History, MlError> {
    let hp = &fn_args.hyperparameters.values;
    let training = &config.training;
    let log_dir = fn_args.log_dir();

    let tf_transform_output = TransformOutput::load(&fn_args.transform_output)?;

    let mut train_set = input_fn_with_seed(
        &fn_args.train_files,
        &tf_transform_output,
        training.batch_size,
        training.seed,
    )?;
    let mut eval_set = input_fn_with_seed(
        &fn_args.eval_files,
        &tf_transform_output,
        training.batch_size,
        training.seed,
    )?;

    let mut model = get_model_with_seed(
        hp,
        tf_transform_output.contract(),
        config.export.show_summary,
        training.seed,
    )?;

    let epochs = hp.initial_epoch()?;
    if epochs <= training.early_stopping_patience {
        tracing::warn!(
            epochs,
            patience = training.early_stopping_patience,
            "Epoch count does not exceed early-stopping patience; early stopping cannot trigger"
        );
    }

    let mut callbacks: Vec<Box<dyn Callback>> = vec![
        Box::new(MetricLogger::new(&log_dir, training.log_update_freq)),
        Box::new(
            EarlyStopping::new(
                &training.monitor,
                training.monitor_mode,
                training.early_stopping_patience,
            )
            .verbose(true),
        ),
        Box::new(
            ModelCheckpoint::new(
                &fn_args.serving_model_dir,
                &training.monitor,
                training.monitor_mode,
            )
            .save_best_only(true)
            .verbose(true),
        ),
    ];

    tracing::info!(
        epochs,
        train_steps = fn_args.train_steps,
        eval_steps = fn_args.eval_steps,
        log_dir = %log_dir.display(),
        "Starting training"
    );
    let history = model.fit(
        &mut train_set,
        Some(&mut eval_set),
        &FitOptions {
            epochs,
            steps_per_epoch: fn_args.train_steps,
            validation_steps: fn_args.eval_steps,
            verbose: true,
        },
        &mut callbacks,
    )?;

    let serve_examples = get_serve_examples_fn(&mut model, &tf_transform_output);
    let signatures = Signatures::from([(
        SERVING_DEFAULT.to_string(),
        serve_examples.get_concrete_function(TensorSpec::string_batch(EXAMPLES_INPUT))?,
    )]);
    model.save(&fn_args.serving_model_dir, &signatures)?;

    plot_model(
        &model,
        &config.export.model_plot_path,
        PlotOptions {
            show_shapes: true,
            show_layer_names: true,
        },
    )?;

    tracing::info!(
        epochs_completed = history.epochs_completed(),
        stopped_epoch = ?history.stopped_epoch,
        seconds = history.total_training_time_secs,
        "Training finished"
    );
    Ok(history)
}

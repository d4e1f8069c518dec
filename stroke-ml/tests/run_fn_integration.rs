//! End-to-end tests for the training driver.
//!
//! Each test writes a transform output, transformed train/eval files and a
//! training argument bundle into a scratch directory, runs the driver and
//! inspects the exported artifact.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stroke_core::TrainerConfig;
use stroke_ml::export::SAVED_MODEL_FILE;
use stroke_ml::serving::{EXAMPLES_INPUT, TensorDtype};
use stroke_ml::transform::{
    FeatureDtype, FeatureSpec, FixedLenFeature, NumericalTransform, RawValue,
};
use stroke_ml::{
    FeatureContract, FnArgs, MlError, OUTPUT_KEY, SERVING_DEFAULT, TransformOutput, load_model,
    run_fn_with_config,
};
use tempfile::TempDir;

const WORK_TYPES: [&str; 3] = ["Private", "Self-employed", "Govt_job"];
const SMOKING: [&str; 5] = ["never smoked", "formerly smoked", "smokes", "Unknown", "children"];

fn transform_output() -> TransformOutput {
    TransformOutput::new(
        FeatureSpec::new()
            .with("work_type", FixedLenFeature::new(FeatureDtype::String))
            .with("smoking_status", FixedLenFeature::new(FeatureDtype::String))
            .with("age", FixedLenFeature::new(FeatureDtype::Float32))
            .with(
                "avg_glucose_level",
                FixedLenFeature::new(FeatureDtype::Float32).with_default(RawValue::Float(100.0)),
            )
            .with("stroke", FixedLenFeature::new(FeatureDtype::Int64)),
        FeatureContract::new("stroke")
            .with_categorical("work_type", 3)
            .with_categorical("smoking_status", 5)
            .with_numerical("age")
            .with_numerical("avg_glucose_level"),
        BTreeMap::from([
            (
                "work_type".to_string(),
                WORK_TYPES.iter().map(|s| s.to_string()).collect(),
            ),
            (
                "smoking_status".to_string(),
                SMOKING.iter().map(|s| s.to_string()).collect(),
            ),
        ]),
        BTreeMap::from([
            (
                "age".to_string(),
                NumericalTransform::ScaleTo01 {
                    min: 0.0,
                    max: 82.0,
                },
            ),
            (
                "avg_glucose_level".to_string(),
                NumericalTransform::ZScore {
                    mean: 106.0,
                    std_dev: 45.0,
                },
            ),
        ]),
    )
    .unwrap()
}

/// Older, hyperglycaemic patients are labelled positive.
fn write_transformed(path: &Path, rows: usize, offset: usize) {
    let lines: Vec<String> = (0..rows)
        .map(|i| {
            let k = i + offset;
            let age = (k * 37 % 100) as f64 / 100.0;
            let glucose = ((k * 53 % 100) as f64 - 50.0) / 25.0;
            json!({
                "work_type_xf": k % 4,
                "smoking_status_xf": k % 6,
                "age_xf": age,
                "avg_glucose_level_xf": glucose,
                "stroke_xf": if age + glucose / 4.0 > 0.7 { 1 } else { 0 }
            })
            .to_string()
        })
        .collect();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, lines.join("\n")).unwrap();
}

struct Pipeline {
    root: TempDir,
    args: FnArgs,
    config: TrainerConfig,
}

impl Pipeline {
    fn new(initial_epoch: usize) -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path();

        let transform_dir = base.join("transform");
        std::fs::create_dir_all(&transform_dir).unwrap();
        transform_output().save(&transform_dir).unwrap();

        write_transformed(&base.join("transformed/train/part-00000.jsonl"), 120, 0);
        write_transformed(&base.join("transformed/train/part-00001.jsonl"), 80, 120);
        write_transformed(&base.join("transformed/eval/part-00000.jsonl"), 60, 1000);

        let args: FnArgs = serde_json::from_value(json!({
            "hyperparameters": {
                "values": {
                    "dense_units": 16,
                    "num_layers": 2,
                    "dropout_rate": 0.2,
                    "learning_rate": 0.001,
                    "tuner/initial_epoch": initial_epoch
                }
            },
            "serving_model_dir": base.join("trainer/serving_model"),
            "transform_output": transform_dir,
            "train_files": [base.join("transformed/train")],
            "eval_files": [base.join("transformed/eval")],
            "train_steps": 5,
            "eval_steps": 2
        }))
        .unwrap();

        let mut config = TrainerConfig::default();
        config.training.batch_size = 16;
        config.export.model_plot_path = base.join("images/model_plot.png");
        config.export.show_summary = false;

        Self {
            root,
            args,
            config,
        }
    }

    fn base(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}

fn raw_records() -> Vec<String> {
    vec![
        json!({
            "work_type": "Private",
            "smoking_status": "smokes",
            "age": 71.0,
            "avg_glucose_level": 228.7
        })
        .to_string(),
        // Unknown category, glucose level falls back to its default.
        json!({"work_type": "Never_worked", "smoking_status": "Unknown", "age": 16.0}).to_string(),
        json!({
            "work_type": "Govt_job",
            "smoking_status": "never smoked",
            "age": 45,
            "avg_glucose_level": 90.1,
            "id": 9046
        })
        .to_string(),
    ]
}

#[test]
fn run_fn_trains_exports_and_plots() {
    let pipeline = Pipeline::new(1);
    let history = run_fn_with_config(&pipeline.args, &pipeline.config).unwrap();

    assert_eq!(history.epochs_completed(), 1);
    assert_eq!(history.stopped_epoch, None);
    for key in ["loss", "binary_accuracy", "val_loss", "val_binary_accuracy"] {
        assert!(history.last(key).is_some(), "missing {key}");
    }

    let base = pipeline.base();
    assert!(base.join("trainer/serving_model").join(SAVED_MODEL_FILE).exists());
    assert!(base.join("images/model_plot.png").exists());

    for split in ["train", "validation"] {
        let dir = base.join("trainer/logs").join(split);
        let logs: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(logs.len(), 1, "{}", dir.display());
    }
    let train_log = std::fs::read_dir(base.join("trainer/logs/train"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let events = std::fs::read_to_string(train_log).unwrap();
    assert!(events.contains("\"batch_loss\""));
    assert!(events.contains("\"epoch_binary_accuracy\""));
    assert!(events.contains("model_summary"));
    let validation_log = std::fs::read_dir(base.join("trainer/logs/validation"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert!(
        std::fs::read_to_string(validation_log)
            .unwrap()
            .contains("\"epoch_binary_accuracy\"")
    );
}

#[test]
fn exported_signature_serves_raw_records_without_label() {
    let pipeline = Pipeline::new(2);
    run_fn_with_config(&pipeline.args, &pipeline.config).unwrap();

    let loaded = load_model(&pipeline.args.serving_model_dir).unwrap();
    assert_eq!(loaded.signature_names().collect::<Vec<_>>(), vec![SERVING_DEFAULT]);

    let serving = loaded.signature(SERVING_DEFAULT).unwrap();
    assert_eq!(serving.input().name, EXAMPLES_INPUT);
    assert_eq!(serving.input().dtype, TensorDtype::String);
    assert_eq!(serving.input().shape, vec![None]);
    assert!(!serving.function().feature_spec().contains("stroke"));

    let outputs = serving.call(&raw_records()).unwrap();
    assert_eq!(outputs.keys().collect::<Vec<_>>(), vec![OUTPUT_KEY]);
    let probabilities = &outputs[OUTPUT_KEY];
    assert_eq!(probabilities.shape(), &[3, 1]);
    assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));

    assert!(matches!(
        loaded.signature("serving_raw"),
        Err(MlError::SignatureNotFound(_))
    ));
}

#[test]
fn early_stopping_fires_only_on_a_non_improving_epoch() {
    let mut pipeline = Pipeline::new(8);
    pipeline.config.training.early_stopping_patience = 0;
    let history = run_fn_with_config(&pipeline.args, &pipeline.config).unwrap();

    let accuracy = history.get("val_binary_accuracy").unwrap();
    let improved = |epoch: usize| {
        accuracy[..epoch]
            .iter()
            .all(|previous| accuracy[epoch] > *previous)
    };

    // Every epoch that let training continue improved on all earlier ones.
    let last = history.epochs_completed() - 1;
    assert!((0..last).all(&improved), "{accuracy:?}");
    match history.stopped_epoch {
        Some(epoch) => {
            assert_eq!(epoch, last);
            assert!(epoch > 0);
            assert!(!improved(epoch), "stopped on an improving epoch: {accuracy:?}");
        }
        None => {
            assert_eq!(history.epochs_completed(), 8);
            assert!(improved(last));
        }
    }
}

#[test]
fn missing_hyperparameter_fails_before_training() {
    let mut pipeline = Pipeline::new(1);
    let mut values = pipeline.args.hyperparameters.values.values().clone();
    values.remove("learning_rate");
    pipeline.args.hyperparameters.values = stroke_ml::HyperParameters::new(values);

    let err = run_fn_with_config(&pipeline.args, &pipeline.config).unwrap_err();
    assert!(matches!(err, MlError::Hyperparameter(_)), "{err}");
    assert!(!pipeline.args.serving_model_dir.exists());
}

#[test]
fn empty_training_split_is_an_error() {
    let mut pipeline = Pipeline::new(1);
    let empty = pipeline.base().join("transformed/empty");
    std::fs::create_dir_all(&empty).unwrap();
    pipeline.args.train_files = vec![empty];
    assert!(matches!(
        run_fn_with_config(&pipeline.args, &pipeline.config),
        Err(MlError::Dataset(_))
    ));
}

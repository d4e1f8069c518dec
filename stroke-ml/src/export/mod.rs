//! Saving and loading model artifacts.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/saved_model.json          architecture, compile config, signatures, fingerprint
//! <dir>/variables/variables.json  dense layer weights
//! <dir>/assets/transform_layer.json  attached transform layer, if any
//! ```

pub mod format;

pub use format::{DenseWeights, FORMAT_VERSION, LayerConfig, SavedModelConfig, Variables};

use crate::builder::DEFAULT_SEED;
use crate::error::MlError;
use crate::nn::Model;
use crate::serving::{ConcreteFunction, Signatures};
use crate::transform::TransformLayer;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use stroke_core::persistence;

pub const SAVED_MODEL_FILE: &str = "saved_model.json";
pub const VARIABLES_DIR: &str = "variables";
pub const VARIABLES_FILE: &str = "variables.json";
pub const ASSETS_DIR: &str = "assets";
pub const TRANSFORM_LAYER_FILE: &str = "transform_layer.json";

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Write `model` and its `signatures` into `dir`, replacing any artifact
/// already there.
pub fn save_model(
    model: &Model,
    dir: impl AsRef<Path>,
    signatures: &Signatures,
) -> Result<SavedModelConfig, MlError> {
    let dir = dir.as_ref();
    if !signatures.is_empty() && model.tft_layer.is_none() {
        return Err(MlError::export(
            "signatures need the transform layer attached to the model",
        ));
    }

    let (layers, variables) = format::describe(model);
    let variables_json = serde_json::to_vec_pretty(&variables)?;
    let fingerprint = hex_sha256(&variables_json);

    let variables_dir = dir.join(VARIABLES_DIR);
    std::fs::create_dir_all(&variables_dir)?;
    persistence::atomic_write(&variables_dir.join(VARIABLES_FILE), &variables_json)?;

    let asset = dir.join(ASSETS_DIR).join(TRANSFORM_LAYER_FILE);
    match &model.tft_layer {
        Some(layer) => {
            std::fs::create_dir_all(dir.join(ASSETS_DIR))?;
            persistence::atomic_write_json(&asset, layer)?;
        }
        None if asset.exists() => std::fs::remove_file(&asset)?,
        None => {}
    }

    let config = SavedModelConfig {
        format_version: FORMAT_VERSION,
        name: model.name().to_string(),
        inputs: model.inputs().to_vec(),
        layers,
        compile: model.compile_config().cloned(),
        signatures: signatures
            .iter()
            .map(|(name, function)| (name.clone(), function.signature_def()))
            .collect(),
        created_at: Utc::now(),
        fingerprint,
    };
    persistence::atomic_write_json(&dir.join(SAVED_MODEL_FILE), &config)?;

    tracing::info!(
        path = %dir.display(),
        signatures = config.signatures.len(),
        fingerprint = %&config.fingerprint[..12],
        "Saved model"
    );
    Ok(config)
}

impl Model {
    /// See [`save_model`].
    pub fn save(
        &self,
        dir: impl AsRef<Path>,
        signatures: &Signatures,
    ) -> Result<SavedModelConfig, MlError> {
        save_model(self, dir, signatures)
    }
}

/// A model restored from disk together with its signatures.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: Arc<Model>,
    pub config: SavedModelConfig,
    pub signatures: Signatures,
}

impl LoadedModel {
    pub fn signature(&self, name: &str) -> Result<&ConcreteFunction, MlError> {
        self.signatures
            .get(name)
            .ok_or_else(|| MlError::SignatureNotFound(name.to_string()))
    }

    pub fn signature_names(&self) -> impl Iterator<Item = &str> {
        self.signatures.keys().map(String::as_str)
    }
}

/// Load an artifact written by [`save_model`], verifying the weights
/// against the stored fingerprint.
pub fn load_model(dir: impl AsRef<Path>) -> Result<LoadedModel, MlError> {
    let dir = dir.as_ref();
    let config_path = dir.join(SAVED_MODEL_FILE);
    if !config_path.exists() {
        return Err(MlError::export(format!(
            "no saved model at {}",
            dir.display()
        )));
    }
    let config: SavedModelConfig = persistence::load_json_required(&config_path)?;
    if config.format_version != FORMAT_VERSION {
        return Err(MlError::export(format!(
            "unsupported saved model format version {} (expected {FORMAT_VERSION})",
            config.format_version
        )));
    }

    let variables_json = std::fs::read(dir.join(VARIABLES_DIR).join(VARIABLES_FILE))?;
    let fingerprint = hex_sha256(&variables_json);
    if fingerprint != config.fingerprint {
        return Err(MlError::export(format!(
            "variables fingerprint mismatch: expected {}, found {fingerprint}",
            config.fingerprint
        )));
    }
    let variables: Variables = serde_json::from_slice(&variables_json)?;

    let mut model = format::rebuild(&config, variables)?;
    if let Some(compile) = &config.compile {
        model.compile(compile.clone(), DEFAULT_SEED);
    }
    let asset = dir.join(ASSETS_DIR).join(TRANSFORM_LAYER_FILE);
    if let Some(layer) = persistence::load_json::<TransformLayer>(&asset)? {
        layer.validate()?;
        model.attach_transform_layer(layer);
    }

    let model = Arc::new(model);
    let signatures = config
        .signatures
        .iter()
        .map(|(name, def)| {
            ConcreteFunction::from_signature_def(def, Arc::clone(&model))
                .map(|function| (name.clone(), function))
        })
        .collect::<Result<Signatures, MlError>>()?;

    tracing::debug!(
        path = %dir.display(),
        signatures = signatures.len(),
        params = model.count_params(),
        "Loaded model"
    );
    Ok(LoadedModel {
        model,
        config,
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_model;
    use crate::hparams::HyperParameters;
    use crate::serving::{
        EXAMPLES_INPUT, OUTPUT_KEY, SERVING_DEFAULT, TensorSpec, get_serve_examples_fn,
    };
    use crate::transform::spec::{FeatureDtype, FeatureSpec, FixedLenFeature};
    use crate::transform::{FeatureContract, NumericalTransform, TransformOutput};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn tto() -> TransformOutput {
        TransformOutput::new(
            FeatureSpec::new()
                .with("smoking_status", FixedLenFeature::new(FeatureDtype::String))
                .with("bmi", FixedLenFeature::new(FeatureDtype::Float32))
                .with("stroke", FixedLenFeature::new(FeatureDtype::Int64)),
            FeatureContract::new("stroke")
                .with_categorical("smoking_status", 2)
                .with_numerical("bmi"),
            BTreeMap::from([(
                "smoking_status".to_string(),
                vec!["smokes".to_string(), "never smoked".to_string()],
            )]),
            BTreeMap::from([(
                "bmi".to_string(),
                NumericalTransform::ZScore {
                    mean: 28.0,
                    std_dev: 7.0,
                },
            )]),
        )
        .unwrap()
    }

    fn model() -> Model {
        let hp: HyperParameters = serde_json::from_value(json!({
            "dense_units": 6,
            "num_layers": 1,
            "dropout_rate": 0.3,
            "learning_rate": 0.01
        }))
        .unwrap();
        get_model(&hp, tto().contract(), false).unwrap()
    }

    fn signatures(model: &mut Model) -> Signatures {
        let serve = get_serve_examples_fn(model, &tto());
        Signatures::from([(
            SERVING_DEFAULT.to_string(),
            serve
                .get_concrete_function(TensorSpec::string_batch(EXAMPLES_INPUT))
                .unwrap(),
        )])
    }

    #[test]
    fn test_save_and_load_preserves_signature() {
        let dir = TempDir::new().unwrap();
        let mut model = model();
        let signatures = signatures(&mut model);
        model.save(dir.path(), &signatures).unwrap();

        assert!(dir.path().join(SAVED_MODEL_FILE).exists());
        assert!(dir.path().join("variables/variables.json").exists());
        assert!(dir.path().join("assets/transform_layer.json").exists());

        let loaded = load_model(dir.path()).unwrap();
        assert_eq!(loaded.signature_names().collect::<Vec<_>>(), vec![SERVING_DEFAULT]);
        let serving = loaded.signature(SERVING_DEFAULT).unwrap();
        assert_eq!(serving.input(), &TensorSpec::string_batch(EXAMPLES_INPUT));
        assert_eq!(loaded.config.compile, model.compile_config().cloned());

        let records = vec![
            json!({"smoking_status": "smokes", "bmi": 31.2}).to_string(),
            json!({"smoking_status": "Unknown", "bmi": 22.0}).to_string(),
        ];
        let before = signatures[SERVING_DEFAULT].call(&records).unwrap();
        let after = serving.call(&records).unwrap();
        assert_eq!(before[OUTPUT_KEY], after[OUTPUT_KEY]);
    }

    #[test]
    fn test_unknown_signature() {
        let dir = TempDir::new().unwrap();
        let mut model = model();
        let signatures = signatures(&mut model);
        save_model(&model, dir.path(), &signatures).unwrap();
        let loaded = load_model(dir.path()).unwrap();
        assert!(matches!(
            loaded.signature("predict"),
            Err(MlError::SignatureNotFound(name)) if name == "predict"
        ));
    }

    #[test]
    fn test_checkpoint_style_save_without_signatures() {
        let dir = TempDir::new().unwrap();
        let model = model();
        save_model(&model, dir.path(), &Signatures::new()).unwrap();
        let loaded = load_model(dir.path()).unwrap();
        assert!(loaded.signatures.is_empty());
        assert!(loaded.model.tft_layer.is_none());
        assert_eq!(loaded.model.output_layer(), model.output_layer());
        assert!(loaded.model.is_compiled());
    }

    #[test]
    fn test_tampered_weights_are_rejected() {
        let dir = TempDir::new().unwrap();
        save_model(&model(), dir.path(), &Signatures::new()).unwrap();
        let path = dir.path().join(VARIABLES_DIR).join(VARIABLES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(b' ');
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(load_model(dir.path()), Err(MlError::Export(_))));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load_model(dir.path()), Err(MlError::Export(_))));
    }
}

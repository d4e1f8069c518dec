//! Transform output descriptor.

use crate::error::MlError;
use crate::transform::layer::{NumericalTransform, TransformLayer};
use crate::transform::spec::FeatureSpec;
use crate::transform::FeatureContract;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use stroke_core::persistence;

/// File name of the descriptor inside a transform output directory.
pub const TRANSFORM_OUTPUT_FILE: &str = "transform_output.json";

/// Everything the upstream transform step hands to training and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    raw_feature_spec: FeatureSpec,
    #[serde(flatten)]
    layer: TransformLayer,
}

impl TransformOutput {
    pub fn new(
        raw_feature_spec: FeatureSpec,
        contract: FeatureContract,
        vocabularies: BTreeMap<String, Vec<String>>,
        numerical: BTreeMap<String, NumericalTransform>,
    ) -> Result<Self, MlError> {
        let output = Self {
            raw_feature_spec,
            layer: TransformLayer::new(contract, vocabularies, numerical)?,
        };
        output.validate()?;
        Ok(output)
    }

    /// Load from a transform output directory or directly from the
    /// descriptor file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MlError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(TRANSFORM_OUTPUT_FILE)
        } else {
            path.to_path_buf()
        };
        let output: Self = persistence::load_json_required(&file)?;
        output.validate()?;
        tracing::debug!(
            path = %file.display(),
            categorical = output.contract().categorical.len(),
            numerical = output.contract().numerical.len(),
            "Loaded transform output"
        );
        Ok(output)
    }

    /// Write the descriptor into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), MlError> {
        persistence::atomic_write_json(&dir.as_ref().join(TRANSFORM_OUTPUT_FILE), self)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), MlError> {
        self.layer.validate()?;
        let contract = self.contract();
        if !self.raw_feature_spec.contains(&contract.label_key) {
            return Err(MlError::transform(format!(
                "label '{}' missing from raw feature spec",
                contract.label_key
            )));
        }
        for name in contract.raw_feature_names() {
            if !self.raw_feature_spec.contains(name) {
                return Err(MlError::transform(format!(
                    "feature '{name}' missing from raw feature spec"
                )));
            }
        }
        Ok(())
    }

    pub fn contract(&self) -> &FeatureContract {
        &self.layer.contract
    }

    /// A fresh copy of the raw feature spec, label included.
    pub fn raw_feature_spec(&self) -> FeatureSpec {
        self.raw_feature_spec.clone()
    }

    /// A fresh transform layer for attaching to a model.
    pub fn transform_features_layer(&self) -> TransformLayer {
        self.layer.clone()
    }
}

//! The transform-output contract.
//!
//! The feature transform itself is defined and fitted upstream; this module
//! only consumes its output: the feature contract (names, cardinalities,
//! label key), the raw feature spec used to parse serialized records, and
//! the fitted per-feature encodings applied at serving time.

pub mod layer;
pub mod output;
pub mod record;
pub mod spec;

pub use layer::{NumericalTransform, TransformLayer, TransformedFeatures};
pub use output::{TRANSFORM_OUTPUT_FILE, TransformOutput};
pub use record::{ParsedFeatures, RawValue, parse_examples};
pub use spec::{FeatureDtype, FeatureSpec, FixedLenFeature};

use serde::{Deserialize, Serialize};

/// Suffix appended to every transformed feature name.
pub const TRANSFORMED_SUFFIX: &str = "_xf";

/// Name of the transformed counterpart of a raw feature.
pub fn transformed_name(key: &str) -> String {
    format!("{key}{TRANSFORMED_SUFFIX}")
}

/// A categorical feature and the size of its vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalFeature {
    pub name: String,
    pub cardinality: usize,
}

/// Feature names and shapes shared by the transform and the model.
///
/// Order matters: model inputs are concatenated categoricals first, then
/// numericals, each group in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub categorical: Vec<CategoricalFeature>,
    pub numerical: Vec<String>,
    pub label_key: String,
}

impl FeatureContract {
    pub fn new(label_key: impl Into<String>) -> Self {
        Self {
            categorical: Vec::new(),
            numerical: Vec::new(),
            label_key: label_key.into(),
        }
    }

    pub fn with_categorical(mut self, name: impl Into<String>, cardinality: usize) -> Self {
        self.categorical.push(CategoricalFeature {
            name: name.into(),
            cardinality,
        });
        self
    }

    pub fn with_numerical(mut self, name: impl Into<String>) -> Self {
        self.numerical.push(name.into());
        self
    }

    /// Number of model inputs.
    pub fn feature_count(&self) -> usize {
        self.categorical.len() + self.numerical.len()
    }

    /// `(transformed name, width)` for every model input, in input order.
    /// Categorical widths carry one extra out-of-vocabulary slot.
    pub fn input_widths(&self) -> Vec<(String, usize)> {
        self.categorical
            .iter()
            .map(|c| (transformed_name(&c.name), c.cardinality + 1))
            .chain(self.numerical.iter().map(|n| (transformed_name(n), 1)))
            .collect()
    }

    pub fn transformed_label_key(&self) -> String {
        transformed_name(&self.label_key)
    }

    /// Raw names of every feature the model consumes (label excluded).
    pub fn raw_feature_names(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.numerical.iter().map(String::as_str))
    }
}

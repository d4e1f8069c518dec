//! The transform layer: fitted encodings applied to parsed raw features.

use crate::error::MlError;
use crate::transform::record::ParsedFeatures;
use crate::transform::{FeatureContract, transformed_name};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transformed feature name → `[batch, width]` matrix.
pub type TransformedFeatures = BTreeMap<String, Array2<f32>>;

/// Fitted scaling for a numerical feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum NumericalTransform {
    /// `(x - min) / (max - min)`; a degenerate range maps to 0.
    ScaleTo01 { min: f64, max: f64 },
    /// `(x - mean) / std_dev`; zero deviation maps to 0.
    ZScore { mean: f64, std_dev: f64 },
    Identity,
}

impl NumericalTransform {
    pub fn apply(&self, x: f32) -> f32 {
        let x = x as f64;
        let y = match self {
            Self::ScaleTo01 { min, max } => {
                let range = max - min;
                if range.abs() < f64::EPSILON {
                    0.0
                } else {
                    (x - min) / range
                }
            }
            Self::ZScore { mean, std_dev } => {
                if std_dev.abs() < f64::EPSILON {
                    0.0
                } else {
                    (x - mean) / std_dev
                }
            }
            Self::Identity => x,
        };
        y as f32
    }
}

/// Applies vocabulary one-hot encoding to categoricals and fitted scaling
/// to numericals, producing the model's named inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformLayer {
    pub contract: FeatureContract,
    /// Raw categorical name → vocabulary, index order.
    pub vocabularies: BTreeMap<String, Vec<String>>,
    /// Raw numerical name → scaling.
    pub numerical: BTreeMap<String, NumericalTransform>,
}

impl TransformLayer {
    /// Build a layer, checking it covers every contract feature and that
    /// vocabulary sizes equal the declared cardinalities.
    pub fn new(
        contract: FeatureContract,
        vocabularies: BTreeMap<String, Vec<String>>,
        numerical: BTreeMap<String, NumericalTransform>,
    ) -> Result<Self, MlError> {
        let layer = Self {
            contract,
            vocabularies,
            numerical,
        };
        layer.validate()?;
        Ok(layer)
    }

    pub fn validate(&self) -> Result<(), MlError> {
        for feature in &self.contract.categorical {
            let vocab = self.vocabularies.get(&feature.name).ok_or_else(|| {
                MlError::transform(format!("no vocabulary for categorical '{}'", feature.name))
            })?;
            if vocab.len() != feature.cardinality {
                return Err(MlError::transform(format!(
                    "vocabulary for '{}' has {} entries, contract declares {}",
                    feature.name,
                    vocab.len(),
                    feature.cardinality
                )));
            }
        }
        for name in &self.contract.numerical {
            if !self.numerical.contains_key(name) {
                return Err(MlError::transform(format!(
                    "no scaling for numerical '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Vocabulary index of `key`, or the out-of-vocabulary slot.
    fn lookup(vocabulary: &[String], key: &str) -> usize {
        vocabulary
            .iter()
            .position(|v| v == key)
            .unwrap_or(vocabulary.len())
    }

    /// Transform a parsed batch into model inputs.
    pub fn apply(&self, parsed: &ParsedFeatures) -> Result<TransformedFeatures, MlError> {
        let batch = parsed.batch_size;
        let mut out = TransformedFeatures::new();

        for feature in &self.contract.categorical {
            let column = Self::column(parsed, &feature.name)?;
            let vocabulary = self
                .vocabularies
                .get(&feature.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let width = feature.cardinality + 1;
            let mut encoded = Array2::<f32>::zeros((batch, width));
            for (row, value) in column.iter().enumerate() {
                let index = Self::lookup(vocabulary, &value.vocabulary_key());
                encoded[[row, index]] = 1.0;
            }
            out.insert(transformed_name(&feature.name), encoded);
        }

        for name in &self.contract.numerical {
            let column = Self::column(parsed, name)?;
            let scaling = self
                .numerical
                .get(name)
                .ok_or_else(|| MlError::transform(format!("no scaling for numerical '{name}'")))?;
            let mut encoded = Array2::<f32>::zeros((batch, 1));
            for (row, value) in column.iter().enumerate() {
                let x = value.as_f32().ok_or_else(|| {
                    MlError::transform(format!("feature '{name}' row {row} is not numeric"))
                })?;
                encoded[[row, 0]] = scaling.apply(x);
            }
            out.insert(transformed_name(name), encoded);
        }

        Ok(out)
    }

    fn column<'a>(
        parsed: &'a ParsedFeatures,
        name: &str,
    ) -> Result<&'a [crate::transform::RawValue], MlError> {
        let column = parsed
            .column(name)
            .ok_or_else(|| MlError::transform(format!("parsed batch has no feature '{name}'")))?;
        if column.len() != parsed.batch_size {
            return Err(MlError::shape(format!(
                "feature '{name}' has {} rows, batch has {}",
                column.len(),
                parsed.batch_size
            )));
        }
        Ok(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::RawValue;

    fn layer() -> TransformLayer {
        let contract = FeatureContract::new("stroke")
            .with_categorical("gender", 2)
            .with_numerical("age");
        TransformLayer::new(
            contract,
            BTreeMap::from([(
                "gender".to_string(),
                vec!["Female".to_string(), "Male".to_string()],
            )]),
            BTreeMap::from([(
                "age".to_string(),
                NumericalTransform::ScaleTo01 {
                    min: 0.0,
                    max: 80.0,
                },
            )]),
        )
        .unwrap()
    }

    fn parsed(genders: &[&str], ages: &[f64]) -> ParsedFeatures {
        ParsedFeatures {
            batch_size: genders.len(),
            columns: BTreeMap::from([
                (
                    "gender".to_string(),
                    genders.iter().map(|g| RawValue::Str(g.to_string())).collect(),
                ),
                (
                    "age".to_string(),
                    ages.iter().map(|a| RawValue::Float(*a)).collect(),
                ),
            ]),
        }
    }

    #[test]
    fn test_one_hot_with_oov_slot() {
        let out = layer()
            .apply(&parsed(&["Male", "Other", "Female"], &[40.0, 0.0, 80.0]))
            .unwrap();
        let gender = &out["gender_xf"];
        assert_eq!(gender.shape(), &[3, 3]);
        assert_eq!(gender.row(0).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(gender.row(1).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(gender.row(2).to_vec(), vec![1.0, 0.0, 0.0]);

        let age = &out["age_xf"];
        assert_eq!(age.column(0).to_vec(), vec![0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_cardinality_mismatch_rejected() {
        let contract = FeatureContract::new("stroke").with_categorical("gender", 3);
        let err = TransformLayer::new(
            contract,
            BTreeMap::from([("gender".to_string(), vec!["Male".to_string()])]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MlError::Transform(_)));
    }

    #[test]
    fn test_missing_column_fails() {
        let mut batch = parsed(&["Male"], &[30.0]);
        batch.columns.remove("age");
        assert!(layer().apply(&batch).is_err());
    }

    #[test]
    fn test_numerical_transforms() {
        let z = NumericalTransform::ZScore {
            mean: 10.0,
            std_dev: 2.0,
        };
        assert_eq!(z.apply(14.0), 2.0);
        let flat = NumericalTransform::ScaleTo01 { min: 3.0, max: 3.0 };
        assert_eq!(flat.apply(3.0), 0.0);
        assert_eq!(NumericalTransform::Identity.apply(-1.5), -1.5);
    }
}

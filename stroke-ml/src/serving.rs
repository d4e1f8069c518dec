//! Serving function and signatures.
//!
//! A serving function takes a batch of serialized raw records, parses them
//! with the raw feature spec minus the label, runs the transform layer
//! attached to the model and returns the model's probabilities under the
//! key [`OUTPUT_KEY`].

use crate::error::MlError;
use crate::nn::Model;
use crate::transform::{FeatureSpec, TransformOutput, parse_examples};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the default serving signature.
pub const SERVING_DEFAULT: &str = "serving_default";
/// Single output key of every serving signature.
pub const OUTPUT_KEY: &str = "outputs";
/// Conventional name of the serialized-records input.
pub const EXAMPLES_INPUT: &str = "examples";
/// Method name recorded in signature definitions.
pub const PREDICT_METHOD_NAME: &str = "tensorflow/serving/predict";

/// Output of a serving call: output key → `[batch, 1]` probabilities.
pub type ServingOutputs = BTreeMap<String, Array2<f32>>;

/// Signature name → bound serving function.
pub type Signatures = BTreeMap<String, ConcreteFunction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDtype {
    String,
    Float32,
}

impl fmt::Display for TensorDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Float32 => write!(f, "float32"),
        }
    }
}

/// Declared type and shape of a signature input or output. `None`
/// dimensions accept any size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: TensorDtype,
    pub shape: Vec<Option<usize>>,
}

impl TensorSpec {
    pub fn new(shape: Vec<Option<usize>>, dtype: TensorDtype, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }

    /// Variable-size batch of strings: shape `[None]`.
    pub fn string_batch(name: impl Into<String>) -> Self {
        Self::new(vec![None], TensorDtype::String, name)
    }

    /// `[None, 1]` float32 probabilities.
    fn probabilities() -> Self {
        Self::new(vec![None, Some(1)], TensorDtype::Float32, OUTPUT_KEY)
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|d| d.map_or_else(|| "-1".to_string(), |v| v.to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}: {} [{dims}]", self.name, self.dtype)
    }
}

/// The raw-records-to-probabilities function.
///
/// Holds a snapshot of the model taken when the function is built, so it
/// can be cloned and shared freely.
#[derive(Debug, Clone)]
pub struct ServeExamplesFn {
    model: Arc<Model>,
    feature_spec: FeatureSpec,
}

/// Attach the transform layer to `model` and return its serving function.
///
/// The label key is removed from the parse spec, so requests never need
/// to carry it.
pub fn get_serve_examples_fn(
    model: &mut Model,
    tf_transform_output: &TransformOutput,
) -> ServeExamplesFn {
    model.attach_transform_layer(tf_transform_output.transform_features_layer());

    let mut feature_spec = tf_transform_output.raw_feature_spec();
    feature_spec.pop(&tf_transform_output.contract().label_key);

    ServeExamplesFn {
        model: Arc::new(model.clone()),
        feature_spec,
    }
}

impl ServeExamplesFn {
    pub(crate) fn from_parts(model: Arc<Model>, feature_spec: FeatureSpec) -> Result<Self, MlError> {
        if model.tft_layer.is_none() {
            return Err(MlError::model(format!(
                "model '{}' has no transform layer attached",
                model.name()
            )));
        }
        Ok(Self {
            model,
            feature_spec,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Spec used to parse incoming records (label removed).
    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.feature_spec
    }

    /// Parse, transform and score a batch of serialized records.
    pub fn call(&self, serialized: &[String]) -> Result<ServingOutputs, MlError> {
        let layer = self.model.tft_layer.as_ref().ok_or_else(|| {
            MlError::model(format!(
                "model '{}' has no transform layer attached",
                self.model.name()
            ))
        })?;
        let parsed = parse_examples(serialized, &self.feature_spec)?;
        let transformed = layer.apply(&parsed)?;
        let probabilities = self.model.predict(&transformed)?;
        Ok(BTreeMap::from([(OUTPUT_KEY.to_string(), probabilities)]))
    }

    /// Specialize the function to a string-batch input.
    pub fn get_concrete_function(&self, input: TensorSpec) -> Result<ConcreteFunction, MlError> {
        if input.dtype != TensorDtype::String {
            return Err(MlError::export(format!(
                "serving input must be a string tensor, got {}",
                input.dtype
            )));
        }
        if input.shape.len() != 1 {
            return Err(MlError::export(format!(
                "serving input must have rank 1, got shape of rank {}",
                input.shape.len()
            )));
        }
        Ok(ConcreteFunction {
            input,
            output: TensorSpec::probabilities(),
            function: self.clone(),
        })
    }
}

/// A serving function bound to one input spec, as stored under a
/// signature name.
#[derive(Debug, Clone)]
pub struct ConcreteFunction {
    input: TensorSpec,
    output: TensorSpec,
    function: ServeExamplesFn,
}

impl ConcreteFunction {
    pub fn input(&self) -> &TensorSpec {
        &self.input
    }

    pub fn output(&self) -> &TensorSpec {
        &self.output
    }

    pub fn function(&self) -> &ServeExamplesFn {
        &self.function
    }

    pub fn call(&self, serialized: &[String]) -> Result<ServingOutputs, MlError> {
        if let Some(Some(expected)) = self.input.shape.first()
            && serialized.len() != *expected
        {
            return Err(MlError::shape(format!(
                "input '{}' expects a batch of {expected}, got {}",
                self.input.name,
                serialized.len()
            )));
        }
        self.function.call(serialized)
    }

    pub fn signature_def(&self) -> SignatureDef {
        SignatureDef {
            method_name: PREDICT_METHOD_NAME.to_string(),
            inputs: BTreeMap::from([(self.input.name.clone(), self.input.clone())]),
            outputs: BTreeMap::from([(OUTPUT_KEY.to_string(), self.output.clone())]),
            feature_spec: self.function.feature_spec.clone(),
        }
    }

    /// Rebind a stored signature to a loaded model.
    pub(crate) fn from_signature_def(
        def: &SignatureDef,
        model: Arc<Model>,
    ) -> Result<Self, MlError> {
        let mut inputs = def.inputs.values();
        let (Some(input), None) = (inputs.next(), inputs.next()) else {
            return Err(MlError::export(format!(
                "signature must have exactly one input, found {}",
                def.inputs.len()
            )));
        };
        let output = def
            .outputs
            .get(OUTPUT_KEY)
            .cloned()
            .ok_or_else(|| MlError::export(format!("signature has no '{OUTPUT_KEY}' output")))?;
        let function = ServeExamplesFn::from_parts(model, def.feature_spec.clone())?;
        let mut concrete = function.get_concrete_function(input.clone())?;
        concrete.output = output;
        Ok(concrete)
    }
}

/// Persisted form of a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDef {
    pub method_name: String,
    pub inputs: BTreeMap<String, TensorSpec>,
    pub outputs: BTreeMap<String, TensorSpec>,
    /// Parse spec applied to incoming records.
    pub feature_spec: FeatureSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_model;
    use crate::hparams::HyperParameters;
    use crate::transform::spec::{FeatureDtype, FixedLenFeature};
    use crate::transform::{FeatureContract, NumericalTransform, RawValue};
    use serde_json::json;

    fn tto() -> TransformOutput {
        TransformOutput::new(
            FeatureSpec::new()
                .with("work_type", FixedLenFeature::new(FeatureDtype::String))
                .with(
                    "age",
                    FixedLenFeature::new(FeatureDtype::Float32).with_default(RawValue::Float(0.0)),
                )
                .with("stroke", FixedLenFeature::new(FeatureDtype::Int64)),
            FeatureContract::new("stroke")
                .with_categorical("work_type", 3)
                .with_numerical("age"),
            BTreeMap::from([(
                "work_type".to_string(),
                vec![
                    "Private".to_string(),
                    "Self-employed".to_string(),
                    "Govt_job".to_string(),
                ],
            )]),
            BTreeMap::from([(
                "age".to_string(),
                NumericalTransform::ScaleTo01 {
                    min: 0.0,
                    max: 100.0,
                },
            )]),
        )
        .unwrap()
    }

    fn model() -> Model {
        let hp: HyperParameters = serde_json::from_value(json!({
            "dense_units": 4,
            "num_layers": 0,
            "dropout_rate": 0.1,
            "learning_rate": 0.001
        }))
        .unwrap();
        get_model(&hp, tto().contract(), false).unwrap()
    }

    fn records() -> Vec<String> {
        vec![
            json!({"work_type": "Private", "age": 67.0}).to_string(),
            json!({"work_type": "Never_worked", "age": 12.5}).to_string(),
            json!({"work_type": "Govt_job"}).to_string(),
        ]
    }

    #[test]
    fn test_serving_output_key_and_batch() {
        let mut model = model();
        let serve = get_serve_examples_fn(&mut model, &tto());
        assert!(model.tft_layer.is_some());

        let outputs = serve.call(&records()).unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec![OUTPUT_KEY]);
        let probabilities = &outputs[OUTPUT_KEY];
        assert_eq!(probabilities.shape(), &[3, 1]);
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_label_is_not_required() {
        let mut model = model();
        let serve = get_serve_examples_fn(&mut model, &tto());
        assert!(!serve.feature_spec().contains("stroke"));

        let with_label = vec![json!({"work_type": "Private", "age": 50, "stroke": 1}).to_string()];
        assert!(serve.call(&with_label).is_ok());
    }

    #[test]
    fn test_malformed_record_fails() {
        let mut model = model();
        let serve = get_serve_examples_fn(&mut model, &tto());
        let bad = vec!["not json".to_string()];
        assert!(matches!(serve.call(&bad), Err(MlError::Parse(_))));
        let missing = vec![json!({"age": 50}).to_string()];
        assert!(matches!(serve.call(&missing), Err(MlError::Parse(_))));
    }

    #[test]
    fn test_concrete_function_validates_input() {
        let mut model = model();
        let serve = get_serve_examples_fn(&mut model, &tto());

        let concrete = serve
            .get_concrete_function(TensorSpec::string_batch(EXAMPLES_INPUT))
            .unwrap();
        assert_eq!(concrete.input().shape, vec![None]);
        assert_eq!(concrete.call(&records()).unwrap()[OUTPUT_KEY].nrows(), 3);
        assert_eq!(concrete.call(&[]).unwrap()[OUTPUT_KEY].nrows(), 0);

        let fixed = serve
            .get_concrete_function(TensorSpec::new(vec![Some(2)], TensorDtype::String, "examples"))
            .unwrap();
        assert!(fixed.call(&records()).is_err());

        let float = TensorSpec::new(vec![None], TensorDtype::Float32, "examples");
        assert!(serve.get_concrete_function(float).is_err());
        let matrix = TensorSpec::new(vec![None, None], TensorDtype::String, "examples");
        assert!(serve.get_concrete_function(matrix).is_err());
    }

    #[test]
    fn test_signature_def_round_trip() {
        let mut model = model();
        let serve = get_serve_examples_fn(&mut model, &tto());
        let concrete = serve
            .get_concrete_function(TensorSpec::string_batch(EXAMPLES_INPUT))
            .unwrap();
        let def = concrete.signature_def();
        assert_eq!(def.method_name, PREDICT_METHOD_NAME);
        assert_eq!(def.inputs["examples"].dtype, TensorDtype::String);
        assert_eq!(def.outputs[OUTPUT_KEY].shape, vec![None, Some(1)]);

        let rebound = ConcreteFunction::from_signature_def(&def, Arc::new(model)).unwrap();
        assert_eq!(rebound.signature_def(), def);
    }
}

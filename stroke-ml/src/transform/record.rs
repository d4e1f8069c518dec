//! Parsing of serialized records against a [`FeatureSpec`].
//!
//! A serialized record is a UTF-8 JSON object mapping raw feature names to
//! scalars. Keys absent from the spec are ignored; every spec key must be
//! present with the declared type unless the spec supplies a default.

use crate::error::MlError;
use crate::transform::spec::{FeatureDtype, FeatureSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single parsed scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawValue {
    pub fn dtype(&self) -> FeatureDtype {
        match self {
            Self::Int(_) => FeatureDtype::Int64,
            Self::Float(_) => FeatureDtype::Float32,
            Self::Str(_) => FeatureDtype::String,
        }
    }

    /// Numeric view; strings are not numbers.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Int(i) => Some(*i as f32),
            Self::Float(f) => Some(*f as f32),
            Self::Str(_) => None,
        }
    }

    /// Key used for vocabulary lookup.
    pub fn vocabulary_key(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    /// Convert to `dtype` where lossless; integers widen to floats.
    pub fn coerce(&self, dtype: FeatureDtype) -> Option<Self> {
        match (self, dtype) {
            (Self::Int(i), FeatureDtype::Float32) => Some(Self::Float(*i as f64)),
            (value, dtype) if value.dtype() == dtype => Some(value.clone()),
            _ => None,
        }
    }

    fn from_json(value: &Value, dtype: FeatureDtype) -> Option<Self> {
        match dtype {
            FeatureDtype::String => value.as_str().map(|s| Self::Str(s.to_string())),
            FeatureDtype::Int64 => value.as_i64().map(Self::Int),
            FeatureDtype::Float32 => value.as_f64().map(Self::Float),
        }
    }
}

/// Column-oriented result of parsing a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeatures {
    pub batch_size: usize,
    pub columns: BTreeMap<String, Vec<RawValue>>,
}

impl ParsedFeatures {
    pub fn column(&self, name: &str) -> Option<&[RawValue]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

/// Parse a batch of serialized records.
pub fn parse_examples(serialized: &[String], spec: &FeatureSpec) -> Result<ParsedFeatures, MlError> {
    let mut columns: BTreeMap<String, Vec<RawValue>> = spec
        .names()
        .map(|name| (name.to_string(), Vec::with_capacity(serialized.len())))
        .collect();

    for (index, record) in serialized.iter().enumerate() {
        let object: serde_json::Map<String, Value> = serde_json::from_str(record)
            .map_err(|e| MlError::parse(format!("record {index}: not a JSON object: {e}")))?;

        for (name, feature) in spec.iter() {
            let value = match object.get(name).filter(|v| !v.is_null()) {
                Some(json) => RawValue::from_json(json, feature.dtype).ok_or_else(|| {
                    MlError::parse(format!(
                        "record {index}: feature '{name}' expected {}, got {json}",
                        feature.dtype
                    ))
                })?,
                None => match &feature.default_value {
                    Some(default) => default.coerce(feature.dtype).ok_or_else(|| {
                        MlError::parse(format!(
                            "feature '{name}' default {default:?} does not match {}",
                            feature.dtype
                        ))
                    })?,
                    None => {
                        return Err(MlError::parse(format!(
                            "record {index}: missing required feature '{name}'"
                        )));
                    }
                },
            };
            if let Some(column) = columns.get_mut(name) {
                column.push(value);
            }
        }
    }

    Ok(ParsedFeatures {
        batch_size: serialized.len(),
        columns,
    })
}

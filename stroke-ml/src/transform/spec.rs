//! Raw feature spec used to parse serialized records.

use crate::transform::record::RawValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element type of a raw feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDtype {
    String,
    Int64,
    Float32,
}

impl std::fmt::Display for FeatureDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
        };
        f.write_str(name)
    }
}

/// A scalar feature present in every record, optionally with a fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedLenFeature {
    pub dtype: FeatureDtype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<RawValue>,
}

impl FixedLenFeature {
    pub fn new(dtype: FeatureDtype) -> Self {
        Self {
            dtype,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: RawValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Feature name → expected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSpec {
    features: BTreeMap<String, FixedLenFeature>,
}

impl FeatureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, feature: FixedLenFeature) -> Self {
        self.features.insert(name.into(), feature);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, feature: FixedLenFeature) {
        self.features.insert(name.into(), feature);
    }

    /// Remove a feature, returning it if it was present.
    pub fn pop(&mut self, name: &str) -> Option<FixedLenFeature> {
        self.features.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&FixedLenFeature> {
        self.features.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FixedLenFeature)> {
        self.features.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

//! Reader for transformed example files.
//!
//! Each file holds one JSON object per line keyed by transformed feature
//! name. Numerical features and the label are numbers; a categorical
//! feature is either its full one-hot vector or an integer index that is
//! expanded to one. The dataset repeats forever with a reshuffle per pass,
//! so an epoch is defined by the caller's step count.

use crate::error::MlError;
use crate::transform::{TransformOutput, TransformedFeatures};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::path::PathBuf;

/// Seed used by [`input_fn`].
pub const DEFAULT_SHUFFLE_SEED: u64 = 42;

/// One batch of model inputs and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: TransformedFeatures,
    /// `[batch, 1]`
    pub labels: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.nrows() == 0
    }
}

#[derive(Debug, Clone)]
struct Example {
    /// Every input's values, concatenated in input order.
    values: Vec<f32>,
    label: f32,
}

/// An endlessly repeating, shuffled stream of batches.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Vec<(String, usize)>,
    examples: Vec<Example>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    passes: usize,
    rng: StdRng,
}

/// Build a batched dataset over transformed example files.
pub fn input_fn(
    files: &[PathBuf],
    tf_transform_output: &TransformOutput,
    batch_size: usize,
) -> Result<Dataset, MlError> {
    input_fn_with_seed(files, tf_transform_output, batch_size, DEFAULT_SHUFFLE_SEED)
}

pub fn input_fn_with_seed(
    files: &[PathBuf],
    tf_transform_output: &TransformOutput,
    batch_size: usize,
    seed: u64,
) -> Result<Dataset, MlError> {
    let contract = tf_transform_output.contract();
    let inputs = contract.input_widths();
    let label_key = contract.transformed_label_key();

    let mut examples = Vec::new();
    for path in expand_files(files)? {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| MlError::dataset(format!("cannot read {}: {e}", path.display())))?;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let example = parse_line(line, &inputs, &label_key).map_err(|e| {
                MlError::dataset(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            examples.push(example);
        }
    }

    tracing::debug!(
        files = files.len(),
        examples = examples.len(),
        batch_size,
        "Loaded transformed examples"
    );
    Dataset::new(inputs, examples, batch_size, seed)
}

/// Directories expand to the regular files they contain, sorted by name.
fn expand_files(files: &[PathBuf]) -> Result<Vec<PathBuf>, MlError> {
    if files.is_empty() {
        return Err(MlError::dataset("no input files given"));
    }
    let mut expanded = Vec::new();
    for path in files {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            expanded.extend(entries);
        } else {
            expanded.push(path.clone());
        }
    }
    Ok(expanded)
}

fn parse_line(line: &str, inputs: &[(String, usize)], label_key: &str) -> Result<Example, String> {
    let object: serde_json::Map<String, Value> =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON object: {e}"))?;

    let mut values = Vec::with_capacity(inputs.iter().map(|(_, w)| w).sum());
    for (name, width) in inputs {
        let value = object
            .get(name)
            .ok_or_else(|| format!("missing feature '{name}'"))?;
        match value {
            Value::Array(items) => {
                if items.len() != *width {
                    return Err(format!(
                        "feature '{name}' has {} values, expected {width}",
                        items.len()
                    ));
                }
                for item in items {
                    let v = item
                        .as_f64()
                        .ok_or_else(|| format!("feature '{name}' contains non-number {item}"))?;
                    values.push(v as f32);
                }
            }
            Value::Number(number) if *width == 1 => {
                let v = number
                    .as_f64()
                    .ok_or_else(|| format!("feature '{name}' is not representable"))?;
                values.push(v as f32);
            }
            Value::Number(number) => {
                let index = number
                    .as_u64()
                    .map(|i| i as usize)
                    .filter(|i| i < width)
                    .ok_or_else(|| {
                        format!("feature '{name}' index {number} out of range for width {width}")
                    })?;
                values.extend((0..*width).map(|i| if i == index { 1.0 } else { 0.0 }));
            }
            other => return Err(format!("feature '{name}' has unsupported value {other}")),
        }
    }

    let label = object
        .get(label_key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing or non-numeric label '{label_key}'"))?;

    Ok(Example {
        values,
        label: label as f32,
    })
}

impl Dataset {
    fn new(
        inputs: Vec<(String, usize)>,
        examples: Vec<Example>,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self, MlError> {
        if batch_size == 0 {
            return Err(MlError::dataset("batch size must be positive"));
        }
        if examples.is_empty() {
            return Err(MlError::dataset("input files contain no examples"));
        }
        let mut dataset = Self {
            order: (0..examples.len()).collect(),
            inputs,
            examples,
            batch_size,
            cursor: 0,
            passes: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        dataset.order.shuffle(&mut dataset.rng);
        Ok(dataset)
    }

    /// Number of distinct examples.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Complete passes over the examples so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    fn next_index(&mut self) -> usize {
        if self.cursor == self.order.len() {
            self.cursor = 0;
            self.passes += 1;
            self.order.shuffle(&mut self.rng);
        }
        let index = self.order[self.cursor];
        self.cursor += 1;
        index
    }

    /// The next full batch; wraps around (and reshuffles) at the end of a pass.
    pub fn next_batch(&mut self) -> Batch {
        let picked: Vec<usize> = (0..self.batch_size).map(|_| self.next_index()).collect();

        let mut features = TransformedFeatures::new();
        let mut offset = 0;
        for (name, width) in &self.inputs {
            let array = Array2::from_shape_fn((picked.len(), *width), |(row, col)| {
                self.examples[picked[row]].values[offset + col]
            });
            features.insert(name.clone(), array);
            offset += width;
        }
        let labels = Array2::from_shape_fn((picked.len(), 1), |(row, _)| {
            self.examples[picked[row]].label
        });

        Batch { features, labels }
    }
}

impl Iterator for Dataset {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        Some(self.next_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::spec::{FeatureDtype, FeatureSpec, FixedLenFeature};
    use crate::transform::{FeatureContract, NumericalTransform};
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn tto() -> TransformOutput {
        TransformOutput::new(
            FeatureSpec::new()
                .with("gender", FixedLenFeature::new(FeatureDtype::String))
                .with("age", FixedLenFeature::new(FeatureDtype::Float32))
                .with("stroke", FixedLenFeature::new(FeatureDtype::Int64)),
            FeatureContract::new("stroke")
                .with_categorical("gender", 2)
                .with_numerical("age"),
            BTreeMap::from([(
                "gender".to_string(),
                vec!["Female".to_string(), "Male".to_string()],
            )]),
            BTreeMap::from([("age".to_string(), NumericalTransform::Identity)]),
        )
        .unwrap()
    }

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_batches_are_full_and_repeat() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "part-0.jsonl",
            &[
                r#"{"gender_xf": [0, 1, 0], "age_xf": 0.5, "stroke_xf": 1}"#,
                r#"{"gender_xf": 0, "age_xf": 0.1, "stroke_xf": 0}"#,
                "",
                r#"{"gender_xf": 2, "age_xf": 0.9, "stroke_xf": 0}"#,
            ],
        );
        let mut dataset = input_fn(&[file], &tto(), 2).unwrap();
        assert_eq!(dataset.len(), 3);

        let batch = dataset.next_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.features["gender_xf"].shape(), &[2, 3]);
        assert_eq!(batch.features["age_xf"].shape(), &[2, 1]);
        assert_eq!(batch.labels.shape(), &[2, 1]);
        for row in batch.features["gender_xf"].rows() {
            assert_eq!(row.sum(), 1.0);
        }

        let _ = dataset.next_batch();
        assert_eq!(dataset.passes(), 1);
        assert_eq!(dataset.by_ref().take(5).count(), 5);
    }

    #[test]
    fn test_directory_expansion() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "a.jsonl",
            &[r#"{"gender_xf": 1, "age_xf": 0.2, "stroke_xf": 0}"#],
        );
        write(
            dir.path(),
            "b.jsonl",
            &[r#"{"gender_xf": 0, "age_xf": 0.3, "stroke_xf": 1}"#],
        );
        let dataset = input_fn(&[dir.path().to_path_buf()], &tto(), 64).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.batch_size(), 64);
    }

    #[test]
    fn test_bad_lines_report_location() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "bad.jsonl",
            &[
                r#"{"gender_xf": 1, "age_xf": 0.2, "stroke_xf": 0}"#,
                r#"{"gender_xf": 5, "age_xf": 0.2, "stroke_xf": 0}"#,
            ],
        );
        let err = input_fn(&[file], &tto(), 2).unwrap_err();
        assert!(err.to_string().contains("bad.jsonl:2"), "{err}");
    }

    #[test]
    fn test_missing_label_and_empty_inputs() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "x.jsonl", &[r#"{"gender_xf": 1, "age_xf": 0.2}"#]);
        assert!(input_fn(&[file], &tto(), 2).is_err());

        let empty = write(dir.path(), "empty.jsonl", &[]);
        assert!(input_fn(&[empty], &tto(), 2).is_err());
        assert!(input_fn(&[], &tto(), 2).is_err());
        assert!(input_fn(&[dir.path().join("absent.jsonl")], &tto(), 2).is_err());
    }
}

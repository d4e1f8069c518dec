//! Error types for the stroke-ml crate.

use thiserror::Error;

/// Top-level error type for model building, training, serving and export.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Hyperparameter error: {0}")]
    Hyperparameter(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),
}

impl MlError {
    pub fn hyperparameter(msg: impl Into<String>) -> Self {
        Self::Hyperparameter(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stroke_core::persistence::{atomic_write, load_json_required};
    use tempfile::TempDir;

    fn write_below_file(dir: &TempDir) -> Result<(), MlError> {
        let blocker = dir.path().join("serving_model");
        std::fs::write(&blocker, b"not a directory")?;
        atomic_write(&blocker.join("saved_model.json"), b"{}")?;
        Ok(())
    }

    #[test]
    fn test_persistence_failures_are_io_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(write_below_file(&dir), Err(MlError::Io(_))));

        let missing: Result<serde_json::Value, MlError> =
            load_json_required(&dir.path().join("absent.json")).map_err(MlError::from);
        assert!(matches!(missing, Err(MlError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_helper_constructors() {
        assert_eq!(
            MlError::hyperparameter("missing required key 'dense_units'").to_string(),
            "Hyperparameter error: missing required key 'dense_units'"
        );
        assert!(matches!(MlError::export("x"), MlError::Export(m) if m == "x"));
    }
}

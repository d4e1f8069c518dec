//! Error types for the stroke-trainer core.

/// Top-level error type for the core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML encoding error: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Convenience alias used across the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Minimal feed-forward network: dense and dropout layers, Adam, binary
//! cross-entropy and binary accuracy.

pub mod activation;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizer;

pub use activation::Activation;
pub use layers::{Dense, Dropout, InputSpec};
pub use loss::{Loss, Metric, binary_accuracy, binary_crossentropy};
pub use model::{CompileConfig, LayerInfo, Model};
pub use optimizer::Adam;

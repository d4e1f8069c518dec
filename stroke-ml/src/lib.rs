//! # stroke-ml: stroke-risk classifier training step
//!
//! Builds a feed-forward binary classifier over mixed categorical and
//! numerical features, fits it against a pre-transformed dataset, and
//! exports a servable artifact whose `serving_default` signature accepts
//! raw serialized records and applies the feature transform before
//! inference.
//!
//! ## Layout
//! - [`transform`]: the transform-output contract (feature names,
//!   cardinalities, raw feature spec, record parsing, the transform layer)
//! - [`dataset`]: reader for transformed example files
//! - [`nn`]: dense/dropout layers, Adam, binary cross-entropy, the model
//! - [`builder`]: assembles and compiles the model from hyperparameters
//! - [`training`]: fit loop, callbacks, history
//! - [`serving`]: serving function and signatures
//! - [`export`]: artifact save/load
//! - [`plot`]: architecture diagram
//! - [`trainer`]: `run_fn`, the training driver

pub mod builder;
pub mod dataset;
pub mod error;
pub mod export;
pub mod hparams;
pub mod nn;
pub mod plot;
pub mod serving;
pub mod trainer;
pub mod training;
pub mod transform;

pub use builder::get_model;
pub use dataset::{Batch, Dataset, input_fn};
pub use error::MlError;
pub use export::{LoadedModel, SavedModelConfig, load_model};
pub use hparams::HyperParameters;
pub use nn::Model;
pub use plot::{PlotOptions, plot_model};
pub use serving::{
    ConcreteFunction, OUTPUT_KEY, SERVING_DEFAULT, ServeExamplesFn, Signatures, TensorSpec,
    get_serve_examples_fn,
};
pub use trainer::{FnArgs, HyperParameterBundle, run_fn, run_fn_with_config};
pub use training::{Callback, EarlyStopping, FitOptions, History, MetricLogger, ModelCheckpoint};
pub use transform::{FeatureContract, TransformOutput, transformed_name};

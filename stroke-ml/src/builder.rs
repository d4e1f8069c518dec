//! Model builder.

use crate::error::MlError;
use crate::hparams::HyperParameters;
use crate::nn::{Activation, Adam, CompileConfig, Dense, Dropout, InputSpec, Loss, Metric, Model};
use crate::transform::FeatureContract;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Default seed for weight initialisation.
pub const DEFAULT_SEED: u64 = 42;

pub const MODEL_NAME: &str = "stroke_classifier";

/// Build and compile the classifier described by `hyperparameters` over
/// the inputs declared in `contract`.
pub fn get_model(
    hyperparameters: &HyperParameters,
    contract: &FeatureContract,
    show_summary: bool,
) -> Result<Model, MlError> {
    get_model_with_seed(hyperparameters, contract, show_summary, DEFAULT_SEED)
}

pub fn get_model_with_seed(
    hyperparameters: &HyperParameters,
    contract: &FeatureContract,
    show_summary: bool,
    seed: u64,
) -> Result<Model, MlError> {
    let dense_units = hyperparameters.dense_units()?;
    let num_layers = hyperparameters.num_layers()?;
    let dropout_rate = hyperparameters.dropout_rate()?;
    let learning_rate = hyperparameters.learning_rate()?;

    let inputs: Vec<InputSpec> = contract
        .input_widths()
        .into_iter()
        .map(|(name, width)| InputSpec { name, width })
        .collect();
    let concat_width: usize = inputs.iter().map(|i| i.width).sum();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut names = LayerNames::default();

    let mut hidden = Vec::with_capacity(num_layers + 1);
    hidden.push(Dense::new(
        names.next("dense"),
        concat_width,
        dense_units,
        Activation::Relu,
        &mut rng,
    )?);
    for _ in 0..num_layers {
        hidden.push(Dense::new(
            names.next("dense"),
            dense_units,
            dense_units,
            Activation::Relu,
            &mut rng,
        )?);
    }

    let dropout = Dropout::new(names.next("dropout"), dropout_rate)?;
    let output = Dense::new(
        names.next("dense"),
        dense_units,
        1,
        Activation::Sigmoid,
        &mut rng,
    )?;

    let mut model = Model::new(MODEL_NAME, inputs, hidden, dropout, output)?;
    model.compile(
        CompileConfig {
            optimizer: Adam::default_params(learning_rate as f32).config(),
            loss: Loss::BinaryCrossentropy,
            metrics: vec![Metric::BinaryAccuracy],
        },
        seed,
    );

    if show_summary {
        tracing::info!("\n{}", model.summary());
    }
    tracing::debug!(
        inputs = model.inputs().len(),
        hidden_layers = model.hidden_layers().len(),
        params = model.count_params(),
        "Built model"
    );

    Ok(model)
}

/// `dense`, `dense_1`, `dense_2`, ... per layer kind.
#[derive(Default)]
struct LayerNames {
    counts: std::collections::HashMap<&'static str, usize>,
}

impl LayerNames {
    fn next(&mut self, kind: &'static str) -> String {
        let count = self.counts.entry(kind).or_insert(0);
        let name = if *count == 0 {
            kind.to_string()
        } else {
            format!("{kind}_{count}")
        };
        *count += 1;
        name
    }
}

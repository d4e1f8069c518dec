use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use serde_json::json;
use std::collections::BTreeMap;
use stroke_ml::dataset::Batch;
use stroke_ml::transform::{FeatureDtype, FeatureSpec, FixedLenFeature, NumericalTransform};
use stroke_ml::{
    FeatureContract, HyperParameters, Model, TransformOutput, get_model, get_serve_examples_fn,
};

const BATCH: usize = 64;

fn transform_output() -> TransformOutput {
    TransformOutput::new(
        FeatureSpec::new()
            .with("work_type", FixedLenFeature::new(FeatureDtype::String))
            .with("smoking_status", FixedLenFeature::new(FeatureDtype::String))
            .with("age", FixedLenFeature::new(FeatureDtype::Float32))
            .with("avg_glucose_level", FixedLenFeature::new(FeatureDtype::Float32))
            .with("stroke", FixedLenFeature::new(FeatureDtype::Int64)),
        FeatureContract::new("stroke")
            .with_categorical("work_type", 3)
            .with_categorical("smoking_status", 5)
            .with_numerical("age")
            .with_numerical("avg_glucose_level"),
        BTreeMap::from([
            (
                "work_type".to_string(),
                vec!["Private".into(), "Self-employed".into(), "Govt_job".into()],
            ),
            (
                "smoking_status".to_string(),
                vec![
                    "never smoked".into(),
                    "formerly smoked".into(),
                    "smokes".into(),
                    "Unknown".into(),
                    "children".into(),
                ],
            ),
        ]),
        BTreeMap::from([
            (
                "age".to_string(),
                NumericalTransform::ScaleTo01 { min: 0.0, max: 82.0 },
            ),
            (
                "avg_glucose_level".to_string(),
                NumericalTransform::ScaleTo01 {
                    min: 55.0,
                    max: 272.0,
                },
            ),
        ]),
    )
    .expect("valid transform output")
}

fn model(tto: &TransformOutput) -> Model {
    let hp: HyperParameters = serde_json::from_value(json!({
        "dense_units": 16,
        "num_layers": 2,
        "dropout_rate": 0.2,
        "learning_rate": 0.001
    }))
    .expect("valid hyperparameters");
    get_model(&hp, tto.contract(), false).expect("model builds")
}

fn batch(model: &Model) -> Batch {
    let features = model
        .inputs()
        .iter()
        .map(|input| {
            let array = Array2::from_shape_fn((BATCH, input.width), |(r, c)| {
                if input.width == 1 {
                    (r % 10) as f32 / 10.0
                } else if c == r % input.width {
                    1.0
                } else {
                    0.0
                }
            });
            (input.name.clone(), array)
        })
        .collect();
    let labels = Array2::from_shape_fn((BATCH, 1), |(r, _)| (r % 2) as f32);
    Batch { features, labels }
}

fn bench_model(c: &mut Criterion) {
    let tto = transform_output();
    let mut model = model(&tto);
    let data = batch(&model);

    c.bench_function("predict_batch_64", |b| {
        b.iter(|| model.predict(black_box(&data.features)))
    });

    c.bench_function("train_on_batch_64", |b| {
        b.iter(|| model.train_on_batch(black_box(&data)))
    });
}

fn bench_serving(c: &mut Criterion) {
    let tto = transform_output();
    let mut model = model(&tto);
    let serve = get_serve_examples_fn(&mut model, &tto);
    let records: Vec<String> = (0..BATCH)
        .map(|i| {
            json!({
                "work_type": ["Private", "Govt_job", "Never_worked"][i % 3],
                "smoking_status": "smokes",
                "age": 20.0 + i as f64,
                "avg_glucose_level": 90.0 + i as f64
            })
            .to_string()
        })
        .collect();

    c.bench_function("serve_examples_64", |b| {
        b.iter(|| serve.call(black_box(&records)))
    });
}

criterion_group!(benches, bench_model, bench_serving);
criterion_main!(benches);

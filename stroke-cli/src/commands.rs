//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use figment::Figment;
use figment::providers::{Format, Json, Toml};
use std::path::{Path, PathBuf};
use stroke_core::TrainerConfig;
use stroke_ml::plot::{ModelGraph, PlotOptions};
use stroke_ml::serving::ServingOutputs;
use stroke_ml::{FnArgs, OUTPUT_KEY, load_model, plot_model, run_fn_with_config};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            args,
            batch_size,
            model_plot_path,
        } => handle_train(&args, batch_size, model_plot_path, workspace),
        Commands::Predict {
            model_dir,
            records,
            signature,
        } => handle_predict(&model_dir, &records, &signature),
        Commands::Inspect { model_dir } => handle_inspect(&model_dir),
        Commands::Plot {
            model_dir,
            out,
            dot,
        } => handle_plot(&model_dir, &out, dot),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load_trainer_config(workspace: &Path) -> anyhow::Result<TrainerConfig> {
    stroke_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

/// Read a training argument bundle; `.toml` files are TOML, anything else JSON.
pub(crate) fn load_fn_args(path: &Path) -> anyhow::Result<FnArgs> {
    if !path.exists() {
        anyhow::bail!("Argument bundle not found: {}", path.display());
    }
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::from(Toml::file(path)),
        _ => Figment::from(Json::file(path)),
    };
    figment
        .extract()
        .with_context(|| format!("Invalid argument bundle {}", path.display()))
}

fn handle_train(
    args_path: &Path,
    batch_size: Option<usize>,
    model_plot_path: Option<PathBuf>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let fn_args = load_fn_args(args_path)?;
    let mut config = load_trainer_config(workspace)?;
    if let Some(batch_size) = batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(path) = model_plot_path {
        config.export.model_plot_path = path;
    }

    let history = run_fn_with_config(&fn_args, &config).context("Training failed")?;

    println!(
        "Trained {} epoch(s); model saved to {}",
        history.epochs_completed(),
        fn_args.serving_model_dir.display()
    );
    if let Some((epoch, value)) =
        history.best(&config.training.monitor, config.training.monitor_mode)
    {
        println!(
            "Best {}: {:.4} (epoch {})",
            config.training.monitor,
            value,
            epoch + 1
        );
    }
    if let Some(epoch) = history.stopped_epoch {
        println!("Stopped early after epoch {}", epoch + 1);
    }
    Ok(())
}

/// Non-empty lines of a JSON-lines file.
pub(crate) fn read_records(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read records from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// `{"outputs": [[p0], [p1], ...]}`
pub(crate) fn outputs_to_json(outputs: &ServingOutputs) -> serde_json::Value {
    let map = outputs
        .iter()
        .map(|(name, array)| {
            let rows: Vec<Vec<f32>> = array.rows().into_iter().map(|r| r.to_vec()).collect();
            (name.clone(), serde_json::json!(rows))
        })
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

fn handle_predict(model_dir: &Path, records_path: &Path, signature: &str) -> anyhow::Result<()> {
    let loaded = load_model(model_dir)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    let function = loaded.signature(signature)?;
    let records = read_records(records_path)?;

    let outputs = function.call(&records)?;
    tracing::debug!(
        records = records.len(),
        outputs = outputs.get(OUTPUT_KEY).map(|o| o.nrows()).unwrap_or(0),
        "Scored records"
    );
    println!("{}", serde_json::to_string_pretty(&outputs_to_json(&outputs))?);
    Ok(())
}

fn handle_inspect(model_dir: &Path) -> anyhow::Result<()> {
    let loaded = load_model(model_dir)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;

    println!("Model:       {}", loaded.config.name);
    println!("Created:     {}", loaded.config.created_at.to_rfc3339());
    println!("Fingerprint: {}", loaded.config.fingerprint);
    println!(
        "Transform:   {}",
        if loaded.model.tft_layer.is_some() {
            "attached"
        } else {
            "none"
        }
    );
    println!();

    if loaded.signatures.is_empty() {
        println!("No signatures.");
    } else {
        println!("Signatures ({}):", loaded.signatures.len());
        for (name, function) in &loaded.signatures {
            println!("  {name}");
            println!("    input  {}", function.input());
            println!("    output {}", function.output());
            let features: Vec<&str> = function.function().feature_spec().names().collect();
            println!("    parses {}", features.join(", "));
        }
    }
    println!();
    println!("{}", loaded.model.summary());
    Ok(())
}

fn handle_plot(model_dir: &Path, out: &Path, dot: bool) -> anyhow::Result<()> {
    let loaded = load_model(model_dir)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    if dot {
        let graph = ModelGraph::from_model(&loaded.model)?;
        println!("{}", graph.to_dot(PlotOptions::default()));
        return Ok(());
    }
    plot_model(&loaded.model, out, PlotOptions::default())?;
    println!("Diagram written to {}", out.display());
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".stroke");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = stroke_core::config::to_toml(&TrainerConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_trainer_config(workspace)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

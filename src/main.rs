//! churnscope: customer churn analysis CLI
//!
//! Orchestrates data loading, feature engineering, balancing, model
//! evaluation, the importance chart and optional single-customer scoring.

use anyhow::{Context, Result};
use churnscope::{
    load_customers, predict_churn, train_and_evaluate, viz, Args, ModelKind, PipelineConfig,
    TrainingRun,
};
use clap::Parser;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "churnscope=debug"
    } else {
        "churnscope=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => PipelineConfig::default(),
    };

    // Fail on a malformed record before spending time on training
    let predict_fields = args.parse_customer_fields()?;

    let start_time = Instant::now();
    let run = run_full_pipeline(&args, &config)?;

    if let Some(fields) = predict_fields {
        run_prediction_mode(&run, &fields)?;
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Load, engineer, balance, train, evaluate and chart
fn run_full_pipeline(args: &Args, config: &PipelineConfig) -> Result<TrainingRun> {
    info!(input = %args.input, "loading customers");
    let records = load_customers(&args.input)
        .with_context(|| format!("Failed to load customers from {}", args.input))?;
    println!("✓ Loaded {} customers", records.len());

    let run = train_and_evaluate(&records, config)?;
    viz::print_run_summary(&run);

    let importance = run
        .outcomes
        .iter()
        .find(|o| o.kind() == ModelKind::Bagged)
        .and_then(|o| o.report())
        .and_then(|r| r.feature_importance.as_ref());
    match importance {
        Some(ranked) => viz::create_feature_importance_chart(
            ranked,
            &args.output,
            "Random Forest Feature Importance",
        )?,
        None => println!("\nNo feature importance chart: the random forest did not fit"),
    }

    Ok(run)
}

/// Score one customer with every fitted variant
fn run_prediction_mode(run: &TrainingRun, fields: &HashMap<String, String>) -> Result<()> {
    println!("\n=== Prediction Mode ===");

    for kind in ModelKind::ALL {
        if let Some(model) = run.model(kind) {
            let prediction = predict_churn(fields, &run.schema, model.classifier())?;
            println!("  {:<20} {:.2}%", kind.name(), prediction.probability * 100.0);
        }
    }

    let model = run
        .preferred_model()
        .context("No classifier fitted successfully; cannot score the customer")?;
    let prediction = predict_churn(fields, &run.schema, model.classifier())?;
    println!("\n✓ {} ({})", prediction, model.kind());

    Ok(())
}

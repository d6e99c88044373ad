//! Run the demand pipeline from a TOML configuration.
//!
//! Usage: `demand_pipeline [config.toml]`, defaulting to
//! `config/pipeline.toml`. Log verbosity follows `RUST_LOG` (default `info`).

use demand_forecast::error::StageContext;
use demand_forecast::{Pipeline, PipelineConfig, PipelineError, PipelineInputs, Stage};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/pipeline.toml";

fn run() -> Result<(), PipelineError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = PipelineConfig::from_toml_file(&path).stage(Stage::LoadInputs, &path)?;
    info!(config = %path, "configuration loaded");
    let pipeline = Pipeline::new(config)?;
    let weeks = pipeline.weeks().stage(Stage::LoadInputs, "generator")?;
    let inputs = PipelineInputs::load(&pipeline.config().paths, &weeks)?;

    let output = pipeline.run(&inputs)?;
    if let Some(test) = &output.model.test {
        info!("\n{}", test);
    }

    let dir = pipeline
        .config()
        .paths
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("output"));
    pipeline.write_outputs(&output, &dir)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(stage = %e.stage, input = %e.input, "{}", e);
            ExitCode::FAILURE
        }
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use household_load_forecast::{config::Config, forecast::Evaluation, telemetry, Pipeline};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "loadcast", version, about = "Hourly household load forecasting pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "LOADCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Ignore cached power and weather data (results are still written through)
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resample power, align weather, build features and export the split
    Prepare,
    /// Fit and compare every model on the exported split
    Evaluate,
    /// Prepare, then evaluate
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let cfg = Config::load(cli.config.as_deref())?;
    let pipeline = Pipeline::new(cfg).use_cache(!cli.no_cache);
    info!(command = ?cli.command, use_cache = !cli.no_cache, "starting loadcast");

    match cli.command {
        Command::Prepare => {
            let split = pipeline.prepare().await?;
            info!(
                train = split.train.len(),
                test = split.test.len(),
                results = %pipeline.config().paths.results_dir.display(),
                "features exported"
            );
        }
        Command::Evaluate => report(&pipeline.evaluate().await?),
        Command::Run => report(&pipeline.run().await?),
    }
    Ok(())
}

fn report(evaluation: &Evaluation) {
    for score in &evaluation.metrics.scores {
        info!(model = %score.model, mae = score.mae, rmse = score.rmse, "model result");
    }
}

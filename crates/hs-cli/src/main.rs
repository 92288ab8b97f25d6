//! Hypersweep CLI
//!
//! Usage:
//!   hypersweep run --config <file> [--seed N] [--output report.json]
//!   hypersweep validate --config <file>
//!   hypersweep sample --config <file> --count N

mod cli;
mod sweep_file;

use anyhow::{Context, Result};
use clap::Parser;
use hs_optimizer::{ParameterSampler, SimulatedExecutor, SweepController, SweepReport};
use hs_types::{CancelReason, TrialRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands, LogFormat};
use sweep_file::SweepFile;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Run { file, output } => {
            let sweep = SweepFile::load(&file.config)?.with_seed(file.seed);
            run(sweep, output.as_deref()).await
        }
        Commands::Validate { file } => {
            let sweep = SweepFile::load(&file.config)?.with_seed(file.seed);
            sweep
                .sweep
                .validate()
                .with_context(|| format!("{} is not a valid sweep", file.config.display()))?;
            println!(
                "{}: ok ({} trials, {} concurrent, metric {} {})",
                file.config.display(),
                sweep.sweep.max_total_trials,
                sweep.sweep.max_concurrent_trials,
                sweep.sweep.goal,
                sweep.sweep.metric_name
            );
            Ok(())
        }
        Commands::Sample { file, count } => {
            let sweep = SweepFile::load(&file.config)?.with_seed(file.seed);
            let sampler = ParameterSampler::new(&sweep.sweep.sampling)
                .context("invalid sampling distribution")?;
            let mut rng = match sweep.sweep.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            for value in sampler.suggest(&mut rng, count) {
                println!("{}={value:e}", sampler.name());
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the summary.
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run(file: SweepFile, output: Option<&Path>) -> Result<()> {
    let executor = SimulatedExecutor::new(file.simulation);
    let mut controller = SweepController::new(file.sweep, executor)
        .context("invalid sweep configuration")?
        .with_compute(file.compute)
        .with_script_arguments(file.script_arguments);

    let control = controller.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping sweep");
            control.stop();
        }
    });

    let report = controller.run().await.context("sweep aborted")?;
    print_summary(&report);

    if let Some(path) = output {
        let json = report.to_json_pretty()?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn print_summary(report: &SweepReport) {
    let best_id = report.best_trial.as_ref().map(|t| t.id);
    let parameter = report
        .trials
        .first()
        .map(|t| t.hyperparameter.name.as_str())
        .unwrap_or("value");

    println!("Sweep {} ({}) finished: {:?}", report.name, report.sweep_id, report.state);
    println!(
        "{} completed, {} cancelled, {} failed; {} {}",
        report.trials_completed, report.trials_cancelled, report.trials_failed, report.goal,
        report.metric_name
    );
    println!();
    println!(
        "  {:>3}  {:>14}  {:<10}  {:>10}  {:>3}  note",
        "#", parameter, "status", "metric", "try"
    );
    for trial in &report.trials {
        let marker = if Some(trial.id) == best_id { '*' } else { ' ' };
        let metric = trial
            .final_metric
            .map(|m| format!("{m:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {:>3}  {:>14.4e}  {:<10}  {:>10}  {:>3}  {}",
            trial.trial_number,
            trial.hyperparameter.value,
            trial.status.to_string(),
            metric,
            trial.attempts,
            note(trial)
        );
    }

    match &report.best_trial {
        Some(best) => println!(
            "\nBest: trial {} with {}={:e} -> {} {}",
            best.trial_number,
            best.hyperparameter.name,
            best.hyperparameter.value,
            report.metric_name,
            best.final_metric.map(|m| format!("{m:.4}")).unwrap_or_default()
        ),
        None => println!("\nNo trial completed."),
    }
}

fn note(trial: &TrialRecord) -> String {
    match (&trial.cancel_reason, &trial.error) {
        (Some(CancelReason::EarlyTermination { step, value, threshold }), _) => {
            format!("early stop at step {step}: {value:.4} vs threshold {threshold:.4}")
        }
        (Some(CancelReason::External), _) => "cancelled on request".to_string(),
        (Some(CancelReason::SweepStopped), _) => "sweep stopped".to_string(),
        (Some(CancelReason::DeadlineExceeded), _) => "deadline exceeded".to_string(),
        (None, Some(error)) => error.clone(),
        (None, None) => String::new(),
    }
}

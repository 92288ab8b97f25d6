//! On-disk sweep description: the sweep itself plus where and how its trials
//! run.

use anyhow::{Context, Result};
use hs_optimizer::{ComputeTarget, SimulationConfig};
use hs_types::SweepConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFile {
    pub sweep: SweepConfig,

    #[serde(default)]
    pub compute: ComputeTarget,

    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Base arguments handed to the training script of every trial.
    #[serde(default)]
    pub script_arguments: serde_json::Value,
}

impl SweepFile {
    /// Load from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep file {}", path.display()))?;
        let file: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", path.display()))?,
            _ => toml::from_str(&raw)
                .with_context(|| format!("invalid TOML in {}", path.display()))?,
        };
        file.simulation
            .validate()
            .with_context(|| format!("invalid [simulation] section in {}", path.display()))?;
        Ok(file)
    }

    /// Apply a seed given on the command line.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.sweep.seed = Some(seed);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::{DistributionKind, Goal};
    use std::io::Write;

    const DEMO: &str = include_str!("../../../demos/transfer_learning_sweep.toml");

    #[test]
    fn demo_file_parses_and_validates() {
        let file: SweepFile = toml::from_str(DEMO).unwrap();
        file.sweep.validate().unwrap();
        file.simulation.validate().unwrap();

        assert_eq!(file.sweep.metric_name, "validation_accuracy");
        assert_eq!(file.sweep.goal, Goal::Maximize);
        assert_eq!(file.sweep.sampling.distribution, DistributionKind::LogUniform);
        assert_eq!(file.sweep.sampling.low, 1e-15);
        assert_eq!(file.sweep.sampling.high, 1e-3);
        let policy = file.sweep.early_termination.as_ref().unwrap();
        assert_eq!(policy.slack_factor, 0.15);
        assert_eq!(policy.evaluation_interval, 2);
        assert_eq!(file.compute.name, "gpucluster");
        assert!(file.script_arguments.get("--how_many_training_steps").is_some());
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let raw = r#"
            [sweep]
            metric_name = "loss"
            goal = "minimize"
            max_total_trials = 4
            max_concurrent_trials = 2

            [sweep.sampling]
            distribution = "uniform"
            low = 0.0
            high = 1.0
        "#;
        let file: SweepFile = toml::from_str(raw).unwrap();
        assert_eq!(file.compute, ComputeTarget::default());
        assert_eq!(file.simulation, SimulationConfig::default());
        assert!(file.script_arguments.is_null());
        assert_eq!(file.sweep.name, "sweep");
    }

    #[test]
    fn loads_json_by_extension_and_overrides_seed() {
        let raw = serde_json::json!({
            "sweep": {
                "metric_name": "validation_accuracy",
                "goal": "MAXIMIZE",
                "max_total_trials": 2,
                "max_concurrent_trials": 1,
                "seed": 1,
                "sampling": {"distribution": "LOG_UNIFORM", "low": 1e-6, "high": 1e-2}
            }
        });
        let mut tmp = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(tmp, "{raw}").unwrap();

        let file = SweepFile::load(tmp.path()).unwrap().with_seed(Some(99));
        assert_eq!(file.sweep.seed, Some(99));

        let kept = SweepFile::load(tmp.path()).unwrap().with_seed(None);
        assert_eq!(kept.sweep.seed, Some(1));
    }

    #[test]
    fn zero_width_simulation_is_refused_on_load() {
        let raw = DEMO.replace("width = 3.0", "width = 0.0");
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(tmp, "{raw}").unwrap();

        let err = SweepFile::load(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("simulation width"));
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = SweepFile::load(Path::new("/nonexistent/sweep.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/sweep.toml"));
    }
}

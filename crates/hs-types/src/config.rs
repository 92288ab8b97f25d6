//! Sweep configuration: the validated description of a hyperparameter sweep.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config_error;
use crate::errors::{ConfigError, DistributionError, SweepResult};

/// Whether the primary metric is maximized or minimized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Goal {
    #[default]
    #[serde(alias = "maximize")]
    Maximize,
    #[serde(alias = "minimize")]
    Minimize,
}

impl Goal {
    /// Strict comparison: `true` only if `candidate` beats `incumbent`.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Goal::Maximize => candidate > incumbent,
            Goal::Minimize => candidate < incumbent,
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Goal::Maximize => write!(f, "MAXIMIZE"),
            Goal::Minimize => write!(f, "MINIMIZE"),
        }
    }
}

/// Shape of the sampling distribution over a real interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionKind {
    /// Uniform over [low, high].
    #[serde(alias = "uniform")]
    Uniform,
    /// Uniform in log-space over [low, high], then exponentiated.
    #[serde(alias = "log_uniform", alias = "loguniform")]
    LogUniform,
}

fn default_parameter() -> String {
    "learning_rate".to_string()
}

/// How the swept hyperparameter is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Name of the hyperparameter passed to the training script.
    #[serde(default = "default_parameter")]
    pub parameter: String,
    pub distribution: DistributionKind,
    pub low: f64,
    pub high: f64,
}

impl SamplingConfig {
    pub fn uniform(low: f64, high: f64) -> Self {
        Self {
            parameter: default_parameter(),
            distribution: DistributionKind::Uniform,
            low,
            high,
        }
    }

    pub fn log_uniform(low: f64, high: f64) -> Self {
        Self {
            parameter: default_parameter(),
            distribution: DistributionKind::LogUniform,
            low,
            high,
        }
    }

    pub fn named(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        let (low, high) = (self.low, self.high);
        if !low.is_finite() || !high.is_finite() {
            return Err(DistributionError::NonFiniteBound { low, high });
        }
        if low >= high {
            return Err(DistributionError::InvertedBounds { low, high });
        }
        if !(high - low).is_finite() {
            return Err(DistributionError::UnrepresentableRange { low, high });
        }
        if self.distribution == DistributionKind::LogUniform && low <= 0.0 {
            return Err(DistributionError::NonPositiveLogBound { low });
        }
        Ok(())
    }
}

/// Bandit early-termination parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyTerminationConfig {
    /// Allowed relative slack S against the best trial.
    pub slack_factor: f64,
    /// Number of steps E between policy checks.
    pub evaluation_interval: u64,
    /// Evaluation steps below this value are skipped.
    #[serde(default)]
    pub delay_evaluation: u64,
}

impl EarlyTerminationConfig {
    pub fn bandit(slack_factor: f64, evaluation_interval: u64) -> Self {
        Self {
            slack_factor,
            evaluation_interval,
            delay_evaluation: 0,
        }
    }

    pub fn with_delay(mut self, delay_evaluation: u64) -> Self {
        self.delay_evaluation = delay_evaluation;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.slack_factor.is_finite() || self.slack_factor < 0.0 {
            return Err(ConfigError::InvalidSlackFactor {
                value: self.slack_factor,
            });
        }
        if self.evaluation_interval == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "evaluation_interval".to_string(),
            });
        }
        Ok(())
    }
}

/// Runtime knobs for the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Delay between two controller ticks.
    pub poll_interval_ms: u64,
    /// Upper bound on any single executor call.
    pub call_timeout_ms: u64,
    /// Submissions allowed per trial before it is marked FAILED.
    pub max_attempts: u32,
    /// Wall-clock budget for the whole sweep. `None` = unlimited.
    pub max_duration_secs: Option<u64>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            call_timeout_ms: 30_000,
            max_attempts: 3,
            max_duration_secs: None,
        }
    }
}

impl ExecutionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> SweepResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(config_error!("poll_interval_ms must be greater than zero"));
        }
        if self.call_timeout_ms == 0 {
            return Err(config_error!("call_timeout_ms must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "max_attempts".to_string(),
            }
            .into());
        }
        if self.max_duration_secs == Some(0) {
            return Err(config_error!("max_duration_secs must be greater than zero when set"));
        }
        Ok(())
    }
}

fn default_name() -> String {
    "sweep".to_string()
}

/// Top-level configuration for a sweep. Constructed once, validated, and
/// handed to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Primary metric used for early termination and best-trial selection.
    pub metric_name: String,
    pub goal: Goal,

    pub max_total_trials: usize,
    pub max_concurrent_trials: usize,

    /// Seed for reproducible sampling.
    #[serde(default)]
    pub seed: Option<u64>,

    pub sampling: SamplingConfig,

    /// `None` disables early termination.
    #[serde(default)]
    pub early_termination: Option<EarlyTerminationConfig>,

    #[serde(default)]
    pub execution: ExecutionSettings,
}

impl SweepConfig {
    pub fn new(
        name: impl Into<String>,
        metric_name: &str,
        goal: Goal,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.to_string(),
            goal,
            max_total_trials: 20,
            max_concurrent_trials: 4,
            seed: None,
            sampling,
            early_termination: None,
            execution: ExecutionSettings::default(),
        }
    }

    pub fn with_max_trials(mut self, total: usize) -> Self {
        self.max_total_trials = total;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent_trials = n;
        self
    }

    pub fn with_early_termination(mut self, policy: EarlyTerminationConfig) -> Self {
        self.early_termination = Some(policy);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_execution(mut self, execution: ExecutionSettings) -> Self {
        self.execution = execution;
        self
    }

    /// Check every field. Errors here are raised before any trial exists.
    pub fn validate(&self) -> SweepResult<()> {
        if self.max_total_trials == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "max_total_trials".to_string(),
            }
            .into());
        }
        if self.max_concurrent_trials == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "max_concurrent_trials".to_string(),
            }
            .into());
        }
        if self.max_concurrent_trials > self.max_total_trials {
            return Err(ConfigError::ConcurrencyExceedsTotal {
                max_concurrent: self.max_concurrent_trials,
                max_total: self.max_total_trials,
            }
            .into());
        }
        if self.metric_name.trim().is_empty() {
            return Err(ConfigError::EmptyMetricName.into());
        }
        self.sampling.validate()?;
        if let Some(policy) = &self.early_termination {
            policy.validate()?;
        }
        self.execution.validate()
    }

    pub fn from_toml_str(raw: &str) -> SweepResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> SweepResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load from a `.json` or `.toml` file. Anything that is not `.json` is
    /// parsed as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> SweepResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SweepError;
    use std::io::Write;

    fn sample_config() -> SweepConfig {
        SweepConfig::new(
            "retrain",
            "validation_accuracy",
            Goal::Maximize,
            SamplingConfig::log_uniform(1e-15, 1e-3),
        )
        .with_max_trials(8)
        .with_concurrency(4)
        .with_early_termination(EarlyTerminationConfig::bandit(0.15, 2))
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn concurrency_above_total_is_rejected() {
        let config = sample_config().with_max_trials(2).with_concurrency(3);
        match config.validate() {
            Err(SweepError::InvalidConfiguration(ConfigError::ConcurrencyExceedsTotal {
                max_concurrent,
                max_total,
            })) => {
                assert_eq!(max_concurrent, 3);
                assert_eq!(max_total, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn zero_counts_are_rejected() {
        let zero_total = sample_config().with_max_trials(0).with_concurrency(0);
        assert!(matches!(
            zero_total.validate(),
            Err(SweepError::InvalidConfiguration(ConfigError::NonPositiveCount { ref field }))
                if field == "max_total_trials"
        ));

        let zero_concurrent = sample_config().with_concurrency(0);
        assert!(matches!(
            zero_concurrent.validate(),
            Err(SweepError::InvalidConfiguration(ConfigError::NonPositiveCount { ref field }))
                if field == "max_concurrent_trials"
        ));
    }

    #[test]
    fn inverted_and_non_finite_bounds_are_rejected() {
        let inverted = SamplingConfig::uniform(0.5, 0.1);
        assert_eq!(
            inverted.validate(),
            Err(DistributionError::InvertedBounds { low: 0.5, high: 0.1 })
        );

        let empty = SamplingConfig::uniform(0.3, 0.3);
        assert!(matches!(
            empty.validate(),
            Err(DistributionError::InvertedBounds { .. })
        ));

        let infinite = SamplingConfig::uniform(0.0, f64::INFINITY);
        assert!(matches!(
            infinite.validate(),
            Err(DistributionError::NonFiniteBound { .. })
        ));

        let nan = SamplingConfig::log_uniform(f64::NAN, 1.0);
        assert!(matches!(
            nan.validate(),
            Err(DistributionError::NonFiniteBound { .. })
        ));
    }

    #[test]
    fn overflowing_width_is_rejected() {
        let huge = SamplingConfig::uniform(-1e308, 1e308);
        assert_eq!(
            huge.validate(),
            Err(DistributionError::UnrepresentableRange {
                low: -1e308,
                high: 1e308
            })
        );
        let mut config = sample_config();
        config.sampling = huge;
        assert!(matches!(
            config.validate(),
            Err(SweepError::InvalidDistribution(_))
        ));

        assert!(SamplingConfig::uniform(-1e307, 1e307).validate().is_ok());
    }

    #[test]
    fn log_uniform_needs_positive_low() {
        let config = SamplingConfig::log_uniform(0.0, 1.0);
        assert_eq!(
            config.validate(),
            Err(DistributionError::NonPositiveLogBound { low: 0.0 })
        );
        // The same bounds are fine for a plain uniform draw.
        assert!(SamplingConfig::uniform(0.0, 1.0).validate().is_ok());
    }

    #[test]
    fn sweep_level_distribution_error_surfaces() {
        let mut config = sample_config();
        config.sampling = SamplingConfig::log_uniform(1e-3, 1e-15);
        assert!(matches!(
            config.validate(),
            Err(SweepError::InvalidDistribution(_))
        ));
    }

    #[test]
    fn early_termination_validation() {
        let negative = EarlyTerminationConfig::bandit(-0.1, 2);
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::InvalidSlackFactor { .. })
        ));

        let zero_interval = EarlyTerminationConfig::bandit(0.1, 0);
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::NonPositiveCount { .. })
        ));

        assert!(EarlyTerminationConfig::bandit(0.0, 1).validate().is_ok());
    }

    #[test]
    fn execution_settings_validation() {
        let config = sample_config().with_execution(ExecutionSettings {
            max_attempts: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let config = sample_config().with_execution(ExecutionSettings {
            poll_interval_ms: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn goal_comparison_is_strict() {
        assert!(Goal::Maximize.is_better(0.9, 0.8));
        assert!(!Goal::Maximize.is_better(0.8, 0.8));
        assert!(Goal::Minimize.is_better(0.1, 0.2));
        assert!(!Goal::Minimize.is_better(0.2, 0.2));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let raw = r#"
            metric_name = "validation_accuracy"
            goal = "MAXIMIZE"
            max_total_trials = 8
            max_concurrent_trials = 4

            [sampling]
            distribution = "LOG_UNIFORM"
            low = 1e-15
            high = 1e-3

            [early_termination]
            slack_factor = 0.15
            evaluation_interval = 2
        "#;
        let config = SweepConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.name, "sweep");
        assert_eq!(config.sampling.parameter, "learning_rate");
        assert_eq!(config.sampling.distribution, DistributionKind::LogUniform);
        assert_eq!(config.execution, ExecutionSettings::default());
        let policy = config.early_termination.as_ref().unwrap();
        assert_eq!(policy.evaluation_interval, 2);
        assert_eq!(policy.delay_evaluation, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_json_without_early_termination() {
        let raw = r#"{
            "name": "no_policy",
            "metric_name": "loss",
            "goal": "minimize",
            "max_total_trials": 3,
            "max_concurrent_trials": 1,
            "sampling": {"distribution": "uniform", "low": 0.0, "high": 1.0},
            "early_termination": null
        }"#;
        let config = SweepConfig::from_json_str(raw).unwrap();
        assert_eq!(config.goal, Goal::Minimize);
        assert!(config.early_termination.is_none());
    }

    #[test]
    fn loads_from_path_by_extension() {
        let config = sample_config().with_seed(7);

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json_file
            .write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();
        assert_eq!(SweepConfig::from_path(json_file.path()).unwrap(), config);

        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        toml_file
            .write_all(toml::to_string(&config).unwrap().as_bytes())
            .unwrap();
        assert_eq!(SweepConfig::from_path(toml_file.path()).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = SweepConfig::from_path("/definitely/not/here.toml");
        assert!(matches!(result, Err(SweepError::Io(_))));
    }
}

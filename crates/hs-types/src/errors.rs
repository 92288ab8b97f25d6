use thiserror::Error;

use crate::trial::{TrialId, TrialStatus};

/// Main error type for the Hypersweep system
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(#[from] DistributionError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Sampling-distribution errors, raised while building a sweep.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("bounds are inverted or empty: low {low} must be below high {high}")]
    InvertedBounds { low: f64, high: f64 },

    #[error("bounds must be finite: low {low}, high {high}")]
    NonFiniteBound { low: f64, high: f64 },

    #[error("log-uniform lower bound must be positive, got {low}")]
    NonPositiveLogBound { low: f64 },

    #[error("range from {low} to {high} is too wide to sample")]
    UnrepresentableRange { low: f64, high: f64 },
}

/// Sweep configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NonPositiveCount { field: String },

    #[error("max_concurrent_trials ({max_concurrent}) exceeds max_total_trials ({max_total})")]
    ConcurrencyExceedsTotal {
        max_concurrent: usize,
        max_total: usize,
    },

    #[error("metric name must not be empty")]
    EmptyMetricName,

    #[error("slack factor must be finite and non-negative, got {value}")]
    InvalidSlackFactor { value: f64 },

    #[error("{message}")]
    Invalid { message: String },
}

/// Trial bookkeeping errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrialError {
    #[error("trial {trial_id} cannot move from {from} to {to}")]
    InvalidTransition {
        trial_id: TrialId,
        from: TrialStatus,
        to: TrialStatus,
    },

    #[error("trial not found: {trial_id}")]
    NotFound { trial_id: TrialId },
}

/// Errors surfaced by the external trial executor.
///
/// None of these is an explicit FAILED report; the controller treats every
/// variant as transient and resubmits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("executor unavailable: {message}")]
    Unavailable { message: String },

    #[error("executor call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("submission rejected: {reason}")]
    Rejected { reason: String },

    #[error("executor lost track of trial {trial_id}")]
    HandleLost { trial_id: TrialId },

    #[error("executor internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for Hypersweep operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Result alias for executor calls.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Macro for creating free-form configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SweepError::InvalidConfiguration($crate::ConfigError::Invalid {
            message: format!($($arg)*),
        })
    };
}

//! Compute-target configuration and task descriptors for trial dispatch.

use hs_types::{Hyperparameter, SweepId, Trial};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster the trials are dispatched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeTarget {
    /// Cluster name (e.g. "gpucluster").
    pub name: String,

    /// Resource requirements per trial.
    pub worker_resources: WorkerResources,
}

impl Default for ComputeTarget {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            worker_resources: WorkerResources::default(),
        }
    }
}

/// Resource requirements for a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerResources {
    /// Number of CPUs per worker (fractional ok).
    pub num_cpus: f64,
    /// Number of GPUs per worker (0 = no GPU).
    pub num_gpus: f64,
    /// Memory in bytes (0 = no limit).
    pub memory_bytes: u64,
}

impl Default for WorkerResources {
    fn default() -> Self {
        Self {
            num_cpus: 1.0,
            num_gpus: 0.0,
            memory_bytes: 0,
        }
    }
}

/// Describes a single trial run handed to an executor.
///
/// A resubmission carries the same hyperparameter with a fresh `task_id` and
/// a higher `attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialTask {
    /// Unique per submission.
    pub task_id: Uuid,

    pub trial_id: Uuid,

    pub sweep_id: SweepId,

    /// Trial sequence number (0-indexed).
    pub trial_number: usize,

    /// 1 for the first submission.
    pub attempt: u32,

    /// Sampled value injected into the training script arguments.
    pub hyperparameter: Hyperparameter,

    /// Base training-script arguments (JSON).
    pub script_arguments: serde_json::Value,

    /// The metric the script must log.
    pub primary_metric: String,

    /// Name of the compute target the task is dispatched to.
    pub compute_target: String,

    pub resources: WorkerResources,
}

impl TrialTask {
    pub fn for_trial(
        trial: &Trial,
        attempt: u32,
        primary_metric: &str,
        script_arguments: &serde_json::Value,
        target: &ComputeTarget,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            trial_id: trial.id,
            sweep_id: trial.sweep_id,
            trial_number: trial.trial_number,
            attempt,
            hyperparameter: trial.hyperparameter.clone(),
            script_arguments: script_arguments.clone(),
            primary_metric: primary_metric.to_string(),
            compute_target: target.name.clone(),
            resources: target.worker_resources.clone(),
        }
    }

    /// Script arguments with the swept hyperparameter merged in as
    /// `--<name>`.
    pub fn arguments(&self) -> serde_json::Value {
        let mut args = match &self.script_arguments {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        args.insert(
            format!("--{}", self.hyperparameter.name),
            serde_json::json!(self.hyperparameter.value),
        );
        serde_json::Value::Object(args)
    }
}

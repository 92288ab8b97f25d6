//! Boundary to whatever actually trains a model for one trial.

use async_trait::async_trait;
use hs_types::{ExecutorResult, MetricObservation};
use serde::{Deserialize, Serialize};

use crate::dispatch::TrialTask;

/// Executor-side view of a submitted trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutorStatus {
    /// Accepted but not yet scheduled on a node.
    Queued,
    Running,
    Completed { final_metric: f64 },
    /// Explicit, unrecoverable failure reported by the training job.
    Failed { reason: String },
}

/// Result of one [`TrialHandle::poll`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialPoll {
    pub status: ExecutorStatus,
    /// Observations reported since the previous poll.
    pub observations: Vec<MetricObservation>,
}

impl TrialPoll {
    pub fn new(status: ExecutorStatus) -> Self {
        Self {
            status,
            observations: Vec::new(),
        }
    }

    pub fn with_observation(mut self, observation: MetricObservation) -> Self {
        self.observations.push(observation);
        self
    }
}

/// Live handle on a submitted trial.
///
/// Both calls must return promptly; the controller also bounds them with a
/// timeout.
#[async_trait]
pub trait TrialHandle: Send {
    /// Current status plus any new metric observations.
    async fn poll(&mut self) -> ExecutorResult<TrialPoll>;

    /// Request cancellation. Advisory: the run may still report a terminal
    /// status afterwards.
    async fn cancel(&mut self) -> ExecutorResult<()>;
}

/// Core executor interface.
///
/// Implementations may dispatch to a managed cluster or simulate training
/// locally (see [`crate::simulated::SimulatedExecutor`]).
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    type Handle: TrialHandle;

    /// Submit a trial. Returns as soon as the executor accepted the task.
    async fn submit(&self, task: &TrialTask) -> ExecutorResult<Self::Handle>;

    /// Human-readable executor name.
    fn name(&self) -> &str;
}

//! In-process (simulated) trial executor.
//!
//! Trains nothing: each trial follows a deterministic learning curve whose
//! plateau depends on how far the sampled value lies from a configured
//! optimum. Useful for running sweeps end to end, for tests, and for trying
//! out early-termination settings before paying for a cluster.

use async_trait::async_trait;
use hs_types::{
    config_error, ExecutorError, ExecutorResult, MetricObservation, SweepResult, TrialId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::dispatch::TrialTask;
use crate::executor::{ExecutorStatus, TrialExecutor, TrialHandle, TrialPoll};

/// Configuration for the simulated executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Steps a trial runs before reporting completion.
    pub total_steps: u64,
    /// Steps advanced per poll.
    pub steps_per_poll: u64,
    /// Polls answered with `Queued` before a trial starts.
    pub queued_polls: u32,
    /// Hyperparameter value with the best plateau.
    pub optimum: f64,
    /// Measure the distance to the optimum in decades instead of linearly.
    pub log_scale: bool,
    /// Distance at which the plateau has dropped by a factor of e.
    pub width: f64,
    /// Plateau reached at the optimum.
    pub peak_metric: f64,
    /// Plateau reached far from the optimum.
    pub floor_metric: f64,
    /// Trial numbers whose training fails half way through, on every attempt.
    pub failing_trials: Vec<usize>,
    /// The first N submissions are refused as unavailable.
    pub transient_submit_failures: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_steps: 10,
            steps_per_poll: 1,
            queued_polls: 0,
            optimum: 1e-4,
            log_scale: true,
            width: 3.0,
            peak_metric: 0.95,
            floor_metric: 0.10,
            failing_trials: Vec::new(),
            transient_submit_failures: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> SweepResult<()> {
        if self.total_steps == 0 {
            return Err(config_error!("simulation total_steps must be at least 1"));
        }
        if self.steps_per_poll == 0 {
            return Err(config_error!("simulation steps_per_poll must be at least 1"));
        }
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(config_error!(
                "simulation width must be positive and finite, got {}",
                self.width
            ));
        }
        if self.log_scale && !(self.optimum.is_finite() && self.optimum > 0.0) {
            return Err(config_error!(
                "log-scale simulation needs a positive optimum, got {}",
                self.optimum
            ));
        }
        Ok(())
    }

    /// Plateau for a given hyperparameter value.
    pub fn plateau(&self, value: f64) -> f64 {
        let distance = if self.log_scale {
            (value.max(f64::MIN_POSITIVE).log10() - self.optimum.log10()).abs()
        } else {
            (value - self.optimum).abs()
        };
        let closeness = (-(distance / self.width).powi(2)).exp();
        self.floor_metric + (self.peak_metric - self.floor_metric) * closeness
    }

    /// Metric reported at `step` for a given hyperparameter value.
    pub fn metric_at(&self, value: f64, step: u64) -> f64 {
        let progress = step as f64 / self.total_steps.max(1) as f64;
        self.plateau(value) * (1.0 - (-3.0 * progress).exp())
    }
}

#[derive(Debug, Default)]
struct SimulationState {
    submissions: Vec<TrialTask>,
    /// Script arguments each accepted submission was launched with.
    launched: Vec<serde_json::Value>,
    cancelled: Vec<TrialId>,
    submit_failures_left: usize,
}

/// A fully in-process executor that simulates training runs.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    config: Arc<SimulationConfig>,
    state: Arc<Mutex<SimulationState>>,
}

impl SimulatedExecutor {
    pub fn new(config: SimulationConfig) -> Self {
        let state = SimulationState {
            submit_failures_left: config.transient_submit_failures,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Create a simulated executor with default settings.
    pub fn with_defaults() -> Self {
        Self::new(SimulationConfig::default())
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Every accepted submission, in order.
    pub fn submissions(&self) -> Vec<TrialTask> {
        self.state.lock().submissions.clone()
    }

    /// Script arguments of every accepted submission, in order.
    pub fn launched_arguments(&self) -> Vec<serde_json::Value> {
        self.state.lock().launched.clone()
    }

    /// Trials whose handles received a cancel request.
    pub fn cancelled_trials(&self) -> Vec<TrialId> {
        self.state.lock().cancelled.clone()
    }
}

#[async_trait]
impl TrialExecutor for SimulatedExecutor {
    type Handle = SimulatedHandle;

    async fn submit(&self, task: &TrialTask) -> ExecutorResult<SimulatedHandle> {
        let arguments = task.arguments();
        {
            let mut state = self.state.lock();
            if state.submit_failures_left > 0 {
                state.submit_failures_left -= 1;
                return Err(ExecutorError::Unavailable {
                    message: format!("simulated cluster {} is scaling up", task.compute_target),
                });
            }
            state.submissions.push(task.clone());
            state.launched.push(arguments.clone());
        }

        info!(
            trial = %task.trial_id,
            attempt = task.attempt,
            target = %task.compute_target,
            gpus = task.resources.num_gpus,
            %arguments,
            "simulated trial accepted"
        );

        Ok(SimulatedHandle {
            fails: self.config.failing_trials.contains(&task.trial_number),
            task: task.clone(),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            step: 0,
            polls: 0,
            cancelled: false,
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Handle on one simulated run.
#[derive(Debug)]
pub struct SimulatedHandle {
    task: TrialTask,
    config: Arc<SimulationConfig>,
    state: Arc<Mutex<SimulationState>>,
    step: u64,
    polls: u32,
    fails: bool,
    cancelled: bool,
}

#[async_trait]
impl TrialHandle for SimulatedHandle {
    async fn poll(&mut self) -> ExecutorResult<TrialPoll> {
        self.polls += 1;
        if self.cancelled {
            return Ok(TrialPoll::new(ExecutorStatus::Failed {
                reason: "cancelled on request".to_string(),
            }));
        }
        if self.polls <= self.config.queued_polls {
            return Ok(TrialPoll::new(ExecutorStatus::Queued));
        }

        let total = self.config.total_steps.max(1);
        let target = (self.step + self.config.steps_per_poll.max(1)).min(total);
        let value = self.task.hyperparameter.value;

        let mut poll = TrialPoll::new(ExecutorStatus::Running);
        while self.step < target {
            self.step += 1;
            if self.fails && self.step * 2 >= total {
                debug!(trial = %self.task.trial_id, step = self.step, "simulated failure");
                poll.status = ExecutorStatus::Failed {
                    reason: format!("training diverged at step {}", self.step),
                };
                return Ok(poll);
            }
            poll.observations.push(MetricObservation::new(
                self.task.primary_metric.clone(),
                self.step,
                self.config.metric_at(value, self.step),
            ));
        }

        if self.step >= total {
            poll.status = ExecutorStatus::Completed {
                final_metric: self.config.metric_at(value, total),
            };
        }
        Ok(poll)
    }

    async fn cancel(&mut self) -> ExecutorResult<()> {
        self.cancelled = true;
        self.state.lock().cancelled.push(self.task.trial_id);
        Ok(())
    }
}

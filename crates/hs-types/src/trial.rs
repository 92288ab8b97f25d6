//! Trial records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Goal;
use crate::errors::TrialError;

/// Unique sweep identifier.
pub type SweepId = Uuid;

/// Unique trial identifier.
pub type TrialId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TrialStatus {
    /// COMPLETED, CANCELLED and FAILED are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrialStatus::Completed | TrialStatus::Cancelled | TrialStatus::Failed
        )
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrialStatus::Pending => "PENDING",
            TrialStatus::Running => "RUNNING",
            TrialStatus::Completed => "COMPLETED",
            TrialStatus::Cancelled => "CANCELLED",
            TrialStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Why a trial ended up CANCELLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancelReason {
    /// The bandit policy found the trial outside the slack band.
    EarlyTermination { step: u64, value: f64, threshold: f64 },
    /// Someone outside the controller asked for it.
    External,
    /// The whole sweep was stopped.
    SweepStopped,
    /// The sweep ran out of wall-clock budget.
    DeadlineExceeded,
}

/// One intermediate metric report from a running trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric: String,
    pub step: u64,
    pub value: f64,
}

impl MetricObservation {
    pub fn new(metric: impl Into<String>, step: u64, value: f64) -> Self {
        Self {
            metric: metric.into(),
            step,
            value,
        }
    }
}

/// What happened to an observation handed to [`Trial::record_observation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationOutcome {
    /// Stored (appended, or replaced the value at the same step).
    Applied,
    /// Older than the latest step already recorded for that metric.
    Stale { latest_step: u64 },
    /// NaN or infinite value.
    NonFinite,
}

/// The swept hyperparameter as handed to one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub name: String,
    pub value: f64,
}

/// A single training run with one sampled hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub sweep_id: SweepId,
    /// Creation order, starting at 0.
    pub trial_number: usize,
    pub hyperparameter: Hyperparameter,
    pub status: TrialStatus,
    /// Kept sorted by step within each metric.
    pub observations: Vec<MetricObservation>,
    pub final_metric: Option<f64>,
    /// Number of submissions made to the executor so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub cancel_reason: Option<CancelReason>,
}

impl Trial {
    pub fn new(sweep_id: SweepId, trial_number: usize, hyperparameter: Hyperparameter) -> Self {
        Self {
            id: Uuid::new_v4(),
            sweep_id,
            trial_number,
            hyperparameter,
            status: TrialStatus::Pending,
            observations: Vec::new(),
            final_metric: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            cancel_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: TrialStatus) -> Result<(), TrialError> {
        let allowed = matches!(
            (self.status, to),
            (TrialStatus::Pending, TrialStatus::Running)
                | (TrialStatus::Pending, TrialStatus::Cancelled)
                | (TrialStatus::Pending, TrialStatus::Failed)
                | (TrialStatus::Running, TrialStatus::Completed)
                | (TrialStatus::Running, TrialStatus::Cancelled)
                | (TrialStatus::Running, TrialStatus::Failed)
        );
        if !allowed {
            return Err(TrialError::InvalidTransition {
                trial_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TrialError> {
        self.transition(TrialStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self, final_metric: f64) -> Result<(), TrialError> {
        self.transition(TrialStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        self.final_metric = Some(final_metric);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, reason: CancelReason) -> Result<(), TrialError> {
        self.transition(TrialStatus::Cancelled)?;
        self.finished_at = Some(Utc::now());
        self.cancel_reason = Some(reason);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String) -> Result<(), TrialError> {
        self.transition(TrialStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        Ok(())
    }

    /// Store an observation unless it is stale for its metric series.
    ///
    /// A stale or non-finite observation leaves the trial untouched.
    pub fn record_observation(&mut self, observation: MetricObservation) -> ObservationOutcome {
        if !observation.value.is_finite() {
            return ObservationOutcome::NonFinite;
        }
        if let Some(latest) = self.latest_observation(&observation.metric) {
            if observation.step < latest.step {
                return ObservationOutcome::Stale {
                    latest_step: latest.step,
                };
            }
            if observation.step == latest.step {
                let step = latest.step;
                if let Some(slot) = self
                    .observations
                    .iter_mut()
                    .rev()
                    .find(|o| o.metric == observation.metric && o.step == step)
                {
                    slot.value = observation.value;
                }
                return ObservationOutcome::Applied;
            }
        }
        self.observations.push(observation);
        ObservationOutcome::Applied
    }

    /// Drop all observations, e.g. when a fresh attempt restarts training.
    pub fn reset_observations(&mut self) {
        self.observations.clear();
    }

    pub fn latest_observation(&self, metric: &str) -> Option<&MetricObservation> {
        self.observations.iter().rev().find(|o| o.metric == metric)
    }

    pub fn latest_step(&self, metric: &str) -> Option<u64> {
        self.latest_observation(metric).map(|o| o.step)
    }

    /// The most recent value reported at or before `step`.
    pub fn value_at(&self, metric: &str, step: u64) -> Option<f64> {
        self.observations
            .iter()
            .rev()
            .find(|o| o.metric == metric && o.step <= step)
            .map(|o| o.value)
    }

    /// Best value reported at or before `step`.
    pub fn best_value_up_to(&self, metric: &str, step: u64, goal: Goal) -> Option<f64> {
        self.observations
            .iter()
            .filter(|o| o.metric == metric && o.step <= step)
            .map(|o| o.value)
            .fold(None, |best, v| match best {
                Some(b) if !goal.is_better(v, b) => Some(b),
                _ => Some(v),
            })
    }

    pub fn to_record(&self) -> TrialRecord {
        TrialRecord {
            id: self.id,
            trial_number: self.trial_number,
            hyperparameter: self.hyperparameter.clone(),
            final_metric: self.final_metric,
            status: self.status,
            attempts: self.attempts,
            error: self.error.clone(),
            cancel_reason: self.cancel_reason.clone(),
        }
    }
}

/// Flattened view of a trial for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: TrialId,
    pub trial_number: usize,
    pub hyperparameter: Hyperparameter,
    pub final_metric: Option<f64>,
    pub status: TrialStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub cancel_reason: Option<CancelReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lr(value: f64) -> Hyperparameter {
        Hyperparameter {
            name: "learning_rate".into(),
            value,
        }
    }

    fn running_trial() -> Trial {
        let mut trial = Trial::new(Uuid::new_v4(), 0, lr(0.01));
        trial.mark_running().unwrap();
        trial
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(Uuid::new_v4(), 1, lr(0.001));
        assert_eq!(trial.status, TrialStatus::Pending);
        assert!(trial.started_at.is_none());

        trial.mark_running().unwrap();
        assert_eq!(trial.status, TrialStatus::Running);
        assert!(trial.started_at.is_some());

        trial.mark_completed(0.91).unwrap();
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.final_metric, Some(0.91));
    }

    #[test]
    fn trial_failure() {
        let mut trial = running_trial();
        trial.mark_failed("out of memory".into()).unwrap();
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("out of memory"));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [
            TrialStatus::Completed,
            TrialStatus::Cancelled,
            TrialStatus::Failed,
        ] {
            let mut trial = running_trial();
            match terminal {
                TrialStatus::Completed => trial.mark_completed(0.5).unwrap(),
                TrialStatus::Cancelled => trial.mark_cancelled(CancelReason::External).unwrap(),
                _ => trial.mark_failed("boom".into()).unwrap(),
            }

            assert!(trial.mark_running().is_err());
            assert!(trial.mark_completed(0.99).is_err());
            assert!(trial.mark_cancelled(CancelReason::External).is_err());
            assert!(trial.mark_failed("again".into()).is_err());
            assert_eq!(trial.status, terminal);
        }
    }

    #[test]
    fn cancelled_trial_never_completes() {
        let mut trial = running_trial();
        trial.mark_cancelled(CancelReason::External).unwrap();
        let err = trial.mark_completed(0.99).unwrap_err();
        assert_eq!(
            err,
            TrialError::InvalidTransition {
                trial_id: trial.id,
                from: TrialStatus::Cancelled,
                to: TrialStatus::Completed,
            }
        );
        assert_eq!(trial.final_metric, None);
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut trial = Trial::new(Uuid::new_v4(), 0, lr(0.1));
        assert!(trial.mark_completed(0.5).is_err());
        assert_eq!(trial.status, TrialStatus::Pending);
    }

    #[test]
    fn stale_observation_is_discarded_without_side_effects() {
        let mut trial = running_trial();
        assert_eq!(
            trial.record_observation(MetricObservation::new("acc", 1, 0.5)),
            ObservationOutcome::Applied
        );
        assert_eq!(
            trial.record_observation(MetricObservation::new("acc", 3, 0.7)),
            ObservationOutcome::Applied
        );
        let before = trial.clone();

        let outcome = trial.record_observation(MetricObservation::new("acc", 2, 0.99));
        assert_eq!(outcome, ObservationOutcome::Stale { latest_step: 3 });
        assert_eq!(trial, before);
        assert_eq!(trial.latest_observation("acc").unwrap().value, 0.7);
    }

    #[test]
    fn same_step_replaces_value() {
        let mut trial = running_trial();
        trial.record_observation(MetricObservation::new("acc", 2, 0.5));
        trial.record_observation(MetricObservation::new("acc", 2, 0.6));
        assert_eq!(trial.observations.len(), 1);
        assert_eq!(trial.value_at("acc", 2), Some(0.6));
    }

    #[test]
    fn metrics_are_ordered_independently() {
        let mut trial = running_trial();
        trial.record_observation(MetricObservation::new("acc", 5, 0.8));
        let outcome = trial.record_observation(MetricObservation::new("loss", 1, 0.4));
        assert_eq!(outcome, ObservationOutcome::Applied);
        assert_eq!(trial.latest_step("loss"), Some(1));
        assert_eq!(trial.latest_step("acc"), Some(5));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut trial = running_trial();
        assert_eq!(
            trial.record_observation(MetricObservation::new("acc", 1, f64::NAN)),
            ObservationOutcome::NonFinite
        );
        assert!(trial.observations.is_empty());
    }

    #[test]
    fn value_lookups_respect_step() {
        let mut trial = running_trial();
        trial.record_observation(MetricObservation::new("acc", 1, 0.4));
        trial.record_observation(MetricObservation::new("acc", 2, 0.9));
        trial.record_observation(MetricObservation::new("acc", 4, 0.6));

        assert_eq!(trial.value_at("acc", 0), None);
        assert_eq!(trial.value_at("acc", 3), Some(0.9));
        assert_eq!(trial.value_at("acc", 10), Some(0.6));

        assert_eq!(trial.best_value_up_to("acc", 1, Goal::Maximize), Some(0.4));
        assert_eq!(trial.best_value_up_to("acc", 4, Goal::Maximize), Some(0.9));
        assert_eq!(trial.best_value_up_to("acc", 4, Goal::Minimize), Some(0.4));
        assert_eq!(trial.best_value_up_to("loss", 4, Goal::Minimize), None);
    }

    #[test]
    fn record_reflects_trial() {
        let mut trial = running_trial();
        trial.attempts = 2;
        trial.mark_completed(0.88).unwrap();
        let record = trial.to_record();
        assert_eq!(record.id, trial.id);
        assert_eq!(record.status, TrialStatus::Completed);
        assert_eq!(record.final_metric, Some(0.88));
        assert_eq!(record.attempts, 2);
        assert_eq!(record.hyperparameter.name, "learning_rate");
    }
}

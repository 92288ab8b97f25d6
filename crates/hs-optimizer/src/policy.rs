//! Bandit early-termination policy.
//!
//! At every evaluation step (a positive multiple of the evaluation interval)
//! a running trial is compared against the best value any non-failed trial
//! reported at or before that step. Trials outside the slack band are
//! cancelled.

use hs_types::{EarlyTerminationConfig, Goal, Trial, TrialId, TrialStatus};
use std::collections::HashMap;

/// A trial the policy wants cancelled, with the numbers that condemned it.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationDecision {
    pub trial_id: TrialId,
    pub step: u64,
    pub value: f64,
    pub best: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct BanditPolicy {
    slack_factor: f64,
    evaluation_interval: u64,
    delay_evaluation: u64,
    goal: Goal,
    metric: String,
    /// Highest evaluation step already checked per trial.
    evaluated_through: HashMap<TrialId, u64>,
}

impl BanditPolicy {
    pub fn new(config: &EarlyTerminationConfig, goal: Goal, metric: impl Into<String>) -> Self {
        Self {
            slack_factor: config.slack_factor,
            evaluation_interval: config.evaluation_interval.max(1),
            delay_evaluation: config.delay_evaluation,
            goal,
            metric: metric.into(),
            evaluated_through: HashMap::new(),
        }
    }

    /// Cut-off derived from the best value so far.
    pub fn threshold(&self, best: f64) -> f64 {
        match self.goal {
            Goal::Maximize => best / (1.0 + self.slack_factor),
            Goal::Minimize => best * (1.0 + self.slack_factor),
        }
    }

    /// Returns the threshold when `value` is strictly worse than it.
    pub fn breaches(&self, value: f64, best: f64) -> Option<f64> {
        let threshold = self.threshold(best);
        self.goal.is_better(threshold, value).then_some(threshold)
    }

    pub fn is_evaluation_step(&self, step: u64) -> bool {
        step > 0 && step >= self.delay_evaluation && step % self.evaluation_interval == 0
    }

    /// Evaluation steps in `(after, through]`, ascending.
    fn due_steps(&self, after: u64, through: u64) -> impl Iterator<Item = u64> {
        let interval = self.evaluation_interval;
        let start = after.saturating_add(1).max(self.delay_evaluation).max(1);
        // No representable multiple past `start` means nothing is ever due.
        let first = start.div_ceil(interval).checked_mul(interval);
        first
            .into_iter()
            .flat_map(move |first| (first..=through).step_by(interval as usize))
    }

    /// Best primary-metric value reported at or before `step` by any trial
    /// that has not failed.
    pub fn best_at(&self, trials: &[Trial], step: u64) -> Option<f64> {
        trials
            .iter()
            .filter(|t| t.status != TrialStatus::Failed)
            .filter_map(|t| t.best_value_up_to(&self.metric, step, self.goal))
            .fold(None, |best, v| match best {
                Some(b) if !self.goal.is_better(v, b) => Some(b),
                _ => Some(v),
            })
    }

    /// Check every running trial at each evaluation step it has reached
    /// since its last check.
    pub fn evaluate(&mut self, trials: &[Trial]) -> Vec<TerminationDecision> {
        let mut decisions = Vec::new();

        for trial in trials.iter().filter(|t| t.status == TrialStatus::Running) {
            let Some(latest) = trial.latest_step(&self.metric) else {
                continue;
            };
            let after = self.evaluated_through.get(&trial.id).copied().unwrap_or(0);

            let mut checked = None;
            for step in self.due_steps(after, latest) {
                checked = Some(step);
                let (Some(value), Some(best)) =
                    (trial.value_at(&self.metric, step), self.best_at(trials, step))
                else {
                    continue;
                };
                if let Some(threshold) = self.breaches(value, best) {
                    decisions.push(TerminationDecision {
                        trial_id: trial.id,
                        step,
                        value,
                        best,
                        threshold,
                    });
                    break;
                }
            }

            if let Some(step) = checked {
                self.evaluated_through.insert(trial.id, step);
            }
        }

        decisions
    }

    /// Drop per-trial bookkeeping, e.g. after a resubmission restarts it.
    pub fn forget(&mut self, trial_id: &TrialId) {
        self.evaluated_through.remove(trial_id);
    }
}

//! Sweep outcome: ordered trial records plus the winning trial.

use chrono::{DateTime, Utc};
use hs_types::{Goal, SweepId, Trial, TrialRecord, TrialStatus};
use serde::{Deserialize, Serialize};

/// Lifecycle state for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepState {
    Pending,
    Running,
    /// Every trial the budget allowed was created and reached a terminal state.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Ran out of wall-clock budget.
    TimedOut,
}

impl SweepState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SweepState::Completed | SweepState::Cancelled | SweepState::TimedOut
        )
    }
}

/// Pick the COMPLETED trial with the best final metric. Ties go to the trial
/// created first.
pub fn select_best<'a, I>(trials: I, goal: Goal) -> Option<&'a Trial>
where
    I: IntoIterator<Item = &'a Trial>,
{
    let mut best: Option<(&Trial, f64)> = None;
    for trial in trials {
        if trial.status != TrialStatus::Completed {
            continue;
        }
        let Some(metric) = trial.final_metric else {
            continue;
        };
        let improves = match best {
            None => true,
            Some((current, current_metric)) => {
                goal.is_better(metric, current_metric)
                    || (metric == current_metric && trial.trial_number < current.trial_number)
            }
        };
        if improves {
            best = Some((trial, metric));
        }
    }
    best.map(|(trial, _)| trial)
}

/// Aggregate result of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: SweepId,
    pub name: String,
    pub metric_name: String,
    pub goal: Goal,
    pub state: SweepState,
    /// In creation order.
    pub trials: Vec<TrialRecord>,
    pub best_trial: Option<TrialRecord>,
    pub trials_completed: usize,
    pub trials_cancelled: usize,
    pub trials_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

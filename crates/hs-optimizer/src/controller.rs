//! Sweep controller: owns every trial of one sweep and drives them through
//! the executor.
//!
//! The controller is the only writer of trial state. Executor reports,
//! policy decisions, and external requests (through [`SweepControl`]) are
//! all applied from [`SweepController::tick`], one at a time.

use chrono::{DateTime, Utc};
use hs_types::{
    CancelReason, ExecutorError, ExecutorResult, ObservationOutcome, SweepConfig, SweepError,
    SweepId, SweepResult, Trial, TrialError, TrialId, TrialStatus,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{ComputeTarget, TrialTask};
use crate::executor::{ExecutorStatus, TrialExecutor, TrialHandle, TrialPoll};
use crate::policy::BanditPolicy;
use crate::report::{select_best, SweepReport, SweepState};
use crate::sampler::ParameterSampler;

/// Events emitted by the controller for external consumption (logging, UI,
/// experiment tracking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepEvent {
    Started {
        sweep_id: SweepId,
        name: String,
    },
    TrialCreated {
        trial_id: TrialId,
        trial_number: usize,
        value: f64,
    },
    TrialStarted {
        trial_id: TrialId,
        task_id: Uuid,
        attempt: u32,
    },
    TrialResubmitting {
        trial_id: TrialId,
        attempt: u32,
        error: String,
    },
    ObservationDiscarded {
        trial_id: TrialId,
        metric: String,
        step: u64,
        /// `None` when the value itself was unusable.
        latest_step: Option<u64>,
    },
    TrialCompleted {
        trial_id: TrialId,
        final_metric: f64,
    },
    TrialCancelled {
        trial_id: TrialId,
        reason: CancelReason,
    },
    TrialFailed {
        trial_id: TrialId,
        error: String,
    },
    LateReportIgnored {
        trial_id: TrialId,
        status: TrialStatus,
    },
    Finished {
        state: SweepState,
        best_trial: Option<TrialId>,
    },
}

/// Requests other tasks can send to a running sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepCommand {
    CancelTrial(TrialId),
    Stop,
}

/// Cloneable handle for steering a sweep from outside its owning task.
#[derive(Debug, Clone)]
pub struct SweepControl {
    tx: mpsc::UnboundedSender<SweepCommand>,
}

impl SweepControl {
    /// Ask for one trial to be cancelled. Returns `false` if the sweep is gone.
    pub fn cancel_trial(&self, trial_id: TrialId) -> bool {
        self.tx.send(SweepCommand::CancelTrial(trial_id)).is_ok()
    }

    /// Ask for the whole sweep to stop.
    pub fn stop(&self) -> bool {
        self.tx.send(SweepCommand::Stop).is_ok()
    }
}

/// Run an executor call with an upper bound on its duration.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = ExecutorResult<T>>,
) -> ExecutorResult<T> {
    timeout(limit, call).await.unwrap_or_else(|_| {
        Err(ExecutorError::Timeout {
            timeout_ms: limit.as_millis() as u64,
        })
    })
}

/// The sweep controller.  Generic over the executor so callers can plug in
/// the simulated executor or a real cluster adapter.
pub struct SweepController<E: TrialExecutor> {
    id: SweepId,
    config: SweepConfig,
    sampler: ParameterSampler,
    policy: Option<BanditPolicy>,
    executor: E,
    compute: ComputeTarget,
    script_arguments: serde_json::Value,
    rng: StdRng,
    /// Every trial ever created, in creation order.
    trials: Vec<Trial>,
    index: HashMap<TrialId, usize>,
    /// Non-terminal trials. `None` means a submission is owed.
    active: HashMap<TrialId, Option<E::Handle>>,
    events: Vec<SweepEvent>,
    state: SweepState,
    /// Set once a stop or the deadline ends trial creation.
    stopping: Option<SweepState>,
    control_tx: mpsc::UnboundedSender<SweepCommand>,
    control_rx: mpsc::UnboundedReceiver<SweepCommand>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    finished_at: Option<DateTime<Utc>>,
}

impl<E: TrialExecutor> SweepController<E> {
    /// Validate `config` and build a controller. Configuration and
    /// distribution errors surface here, never during the loop.
    pub fn new(config: SweepConfig, executor: E) -> SweepResult<Self> {
        config.validate()?;
        let sampler = ParameterSampler::new(&config.sampling)?;
        let policy = config
            .early_termination
            .as_ref()
            .map(|et| BanditPolicy::new(et, config.goal, config.metric_name.clone()));
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            sampler,
            policy,
            executor,
            compute: ComputeTarget::default(),
            script_arguments: serde_json::Value::Null,
            rng,
            trials: Vec::new(),
            index: HashMap::new(),
            active: HashMap::new(),
            events: Vec::new(),
            state: SweepState::Pending,
            stopping: None,
            control_tx,
            control_rx,
            started_at: None,
            started_instant: None,
            finished_at: None,
        })
    }

    pub fn with_compute(mut self, compute: ComputeTarget) -> Self {
        self.compute = compute;
        self
    }

    pub fn with_script_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.script_arguments = arguments;
        self
    }

    // -- driving ------------------------------------------------------------

    /// Drive the sweep to completion.
    pub async fn run(&mut self) -> SweepResult<SweepReport> {
        let poll_interval = self.config.execution.poll_interval();
        while !self.tick().await? {
            tokio::time::sleep(poll_interval).await;
        }
        Ok(self.report())
    }

    /// One pass of the orchestration loop. Returns `true` once the sweep has
    /// finished.
    pub async fn tick(&mut self) -> SweepResult<bool> {
        if self.state == SweepState::Pending {
            self.start();
        }
        if self.state.is_finished() {
            return Ok(true);
        }

        self.process_commands().await?;
        self.check_deadline().await?;
        self.fill_capacity().await?;
        self.poll_running().await?;
        self.apply_policy().await?;
        self.fill_capacity().await?;
        self.check_invariants();

        if self.trials.iter().all(Trial::is_terminal)
            && (self.stopping.is_some() || self.trials.len() == self.config.max_total_trials)
        {
            self.finish();
            return Ok(true);
        }
        Ok(false)
    }

    fn start(&mut self) {
        self.state = SweepState::Running;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());

        info!(
            sweep = %self.id,
            name = %self.config.name,
            executor = self.executor.name(),
            max_total = self.config.max_total_trials,
            max_concurrent = self.config.max_concurrent_trials,
            "sweep started"
        );
        self.emit(SweepEvent::Started {
            sweep_id: self.id,
            name: self.config.name.clone(),
        });
    }

    fn finish(&mut self) {
        self.state = self.stopping.unwrap_or(SweepState::Completed);
        self.finished_at = Some(Utc::now());

        let best = self.best_trial().map(|t| (t.id, t.final_metric));
        match best {
            Some((id, metric)) => info!(
                sweep = %self.id,
                state = ?self.state,
                best_trial = %id,
                best_metric = ?metric,
                "sweep finished"
            ),
            None => warn!(
                sweep = %self.id,
                state = ?self.state,
                "sweep finished without a completed trial"
            ),
        }
        self.emit(SweepEvent::Finished {
            state: self.state,
            best_trial: best.map(|(id, _)| id),
        });
    }

    async fn process_commands(&mut self) -> SweepResult<()> {
        while let Ok(command) = self.control_rx.try_recv() {
            match command {
                SweepCommand::CancelTrial(trial_id) => match self.cancel_trial(trial_id).await {
                    Ok(_) => {}
                    Err(SweepError::Trial(TrialError::NotFound { .. })) => {
                        warn!(
                            sweep = %self.id,
                            trial = %trial_id,
                            "cancel requested for unknown trial"
                        );
                    }
                    Err(e) => return Err(e),
                },
                SweepCommand::Stop => self.stop().await?,
            }
        }
        Ok(())
    }

    async fn check_deadline(&mut self) -> SweepResult<()> {
        let (Some(limit), Some(started)) =
            (self.config.execution.max_duration(), self.started_instant)
        else {
            return Ok(());
        };
        if self.stopping.is_none() && started.elapsed() >= limit {
            warn!(sweep = %self.id, limit_secs = limit.as_secs(), "sweep deadline exceeded");
            self.shut_down(SweepState::TimedOut, CancelReason::DeadlineExceeded)
                .await?;
        }
        Ok(())
    }

    /// Cancel every outstanding trial and stop creating new ones.
    pub async fn stop(&mut self) -> SweepResult<()> {
        self.shut_down(SweepState::Cancelled, CancelReason::SweepStopped)
            .await
    }

    async fn shut_down(&mut self, state: SweepState, reason: CancelReason) -> SweepResult<()> {
        if self.stopping.is_some() {
            return Ok(());
        }
        info!(sweep = %self.id, state = ?state, "sweep shutting down");
        self.stopping = Some(state);

        let outstanding: Vec<TrialId> = self
            .trials
            .iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id)
            .collect();
        for trial_id in outstanding {
            self.cancel_with_reason(trial_id, reason.clone()).await?;
        }
        Ok(())
    }

    // -- trial creation and submission ---------------------------------------

    fn can_create(&self) -> bool {
        self.stopping.is_none()
            && self.trials.len() < self.config.max_total_trials
            && self.active.len() < self.config.max_concurrent_trials
    }

    async fn fill_capacity(&mut self) -> SweepResult<()> {
        let mut owed: Vec<&Trial> = self
            .active
            .iter()
            .filter(|(_, handle)| handle.is_none())
            .filter_map(|(id, _)| self.index.get(id).map(|&idx| &self.trials[idx]))
            .collect();
        owed.sort_by_key(|t| t.trial_number);
        let owed: Vec<TrialId> = owed.into_iter().map(|t| t.id).collect();

        for trial_id in owed {
            self.submit(trial_id).await?;
        }
        while self.can_create() {
            let trial_id = self.create_trial();
            self.submit(trial_id).await?;
        }
        Ok(())
    }

    fn create_trial(&mut self) -> TrialId {
        let trial_number = self.trials.len();
        let hyperparameter = self.sampler.sample_hyperparameter(&mut self.rng);
        let trial = Trial::new(self.id, trial_number, hyperparameter);
        let trial_id = trial.id;

        debug!(
            sweep = %self.id,
            trial = %trial_id,
            trial_number,
            parameter = %trial.hyperparameter.name,
            value = trial.hyperparameter.value,
            "trial created"
        );
        self.emit(SweepEvent::TrialCreated {
            trial_id,
            trial_number,
            value: trial.hyperparameter.value,
        });

        self.index.insert(trial_id, trial_number);
        self.trials.push(trial);
        self.active.insert(trial_id, None);
        trial_id
    }

    async fn submit(&mut self, trial_id: TrialId) -> SweepResult<()> {
        let idx = self.index_of(&trial_id)?;
        let call_timeout = self.config.execution.call_timeout();

        let task = {
            let trial = &mut self.trials[idx];
            trial.attempts += 1;
            TrialTask::for_trial(
                trial,
                trial.attempts,
                &self.config.metric_name,
                &self.script_arguments,
                &self.compute,
            )
        };

        match bounded(call_timeout, self.executor.submit(&task)).await {
            Ok(handle) => {
                if self.trials[idx].status == TrialStatus::Pending {
                    debug_assert!(self.running_count() < self.config.max_concurrent_trials);
                    self.trials[idx].mark_running()?;
                }
                info!(
                    sweep = %self.id,
                    trial = %trial_id,
                    task = %task.task_id,
                    attempt = task.attempt,
                    value = task.hyperparameter.value,
                    "trial submitted"
                );
                self.emit(SweepEvent::TrialStarted {
                    trial_id,
                    task_id: task.task_id,
                    attempt: task.attempt,
                });
                self.active.insert(trial_id, Some(handle));
                Ok(())
            }
            Err(error) => self.handle_executor_error(trial_id, error).await,
        }
    }

    /// Any executor error short of an explicit FAILED report: resubmit the
    /// same configuration until the attempt budget is spent.
    async fn handle_executor_error(
        &mut self,
        trial_id: TrialId,
        error: ExecutorError,
    ) -> SweepResult<()> {
        let idx = self.index_of(&trial_id)?;
        let call_timeout = self.config.execution.call_timeout();

        if let Some(Some(mut lost)) = self.active.insert(trial_id, None) {
            if let Err(e) = bounded(call_timeout, lost.cancel()).await {
                debug!(trial = %trial_id, error = %e, "cancel of abandoned attempt failed");
            }
        }

        let attempts = self.trials[idx].attempts;
        if attempts >= self.config.execution.max_attempts {
            return self.fail_trial(idx, format!("gave up after {attempts} attempts: {error}"));
        }

        warn!(
            sweep = %self.id,
            trial = %trial_id,
            attempt = attempts,
            error = %error,
            "transient executor error, resubmitting"
        );
        // A new attempt restarts training from step zero.
        self.trials[idx].reset_observations();
        if let Some(policy) = self.policy.as_mut() {
            policy.forget(&trial_id);
        }
        self.emit(SweepEvent::TrialResubmitting {
            trial_id,
            attempt: attempts + 1,
            error: error.to_string(),
        });
        Ok(())
    }

    // -- reports from the executor -----------------------------------------

    async fn poll_running(&mut self) -> SweepResult<()> {
        let call_timeout = self.config.execution.call_timeout();
        let polled: Vec<TrialId> = self
            .trials
            .iter()
            .filter(|t| t.status == TrialStatus::Running)
            .filter(|t| matches!(self.active.get(&t.id), Some(Some(_))))
            .map(|t| t.id)
            .collect();

        for trial_id in polled {
            let Some(Some(handle)) = self.active.get_mut(&trial_id) else {
                continue;
            };
            match bounded(call_timeout, handle.poll()).await {
                Ok(poll) => self.apply_poll(trial_id, poll)?,
                Err(error) => self.handle_executor_error(trial_id, error).await?,
            }
        }
        Ok(())
    }

    /// Apply one executor report to a trial.
    ///
    /// Reports for trials that already reached a terminal state are ignored,
    /// so a cancelled trial stays cancelled whatever its executor says later.
    pub fn apply_poll(&mut self, trial_id: TrialId, poll: TrialPoll) -> SweepResult<()> {
        let idx = self.index_of(&trial_id)?;

        if self.trials[idx].is_terminal() {
            let status = self.trials[idx].status;
            debug!(
                trial = %trial_id,
                status = %status,
                reported = ?poll.status,
                "ignoring report for finished trial"
            );
            self.emit(SweepEvent::LateReportIgnored { trial_id, status });
            return Ok(());
        }

        for observation in poll.observations {
            let (metric, step) = (observation.metric.clone(), observation.step);
            match self.trials[idx].record_observation(observation) {
                ObservationOutcome::Applied => {}
                ObservationOutcome::Stale { latest_step } => {
                    debug!(
                        trial = %trial_id,
                        metric = %metric,
                        step,
                        latest_step,
                        "discarding stale observation"
                    );
                    self.emit(SweepEvent::ObservationDiscarded {
                        trial_id,
                        metric,
                        step,
                        latest_step: Some(latest_step),
                    });
                }
                ObservationOutcome::NonFinite => {
                    debug!(
                        trial = %trial_id,
                        metric = %metric,
                        step,
                        "discarding non-finite observation"
                    );
                    self.emit(SweepEvent::ObservationDiscarded {
                        trial_id,
                        metric,
                        step,
                        latest_step: None,
                    });
                }
            }
        }

        match poll.status {
            ExecutorStatus::Queued | ExecutorStatus::Running => Ok(()),
            ExecutorStatus::Completed { final_metric } if final_metric.is_finite() => {
                self.trials[idx].mark_completed(final_metric)?;
                self.active.remove(&trial_id);
                info!(sweep = %self.id, trial = %trial_id, final_metric, "trial completed");
                self.emit(SweepEvent::TrialCompleted {
                    trial_id,
                    final_metric,
                });
                Ok(())
            }
            ExecutorStatus::Completed { final_metric } => {
                self.fail_trial(idx, format!("non-finite final metric {final_metric}"))
            }
            ExecutorStatus::Failed { reason } => self.fail_trial(idx, reason),
        }
    }

    fn fail_trial(&mut self, idx: usize, error: String) -> SweepResult<()> {
        let trial_id = self.trials[idx].id;
        self.trials[idx].mark_failed(error.clone())?;
        self.active.remove(&trial_id);
        if let Some(policy) = self.policy.as_mut() {
            policy.forget(&trial_id);
        }
        warn!(sweep = %self.id, trial = %trial_id, error = %error, "trial failed");
        self.emit(SweepEvent::TrialFailed { trial_id, error });
        Ok(())
    }

    // -- cancellation -------------------------------------------------------

    async fn apply_policy(&mut self) -> SweepResult<()> {
        let decisions = match self.policy.as_mut() {
            Some(policy) => policy.evaluate(&self.trials),
            None => return Ok(()),
        };
        for decision in decisions {
            info!(
                sweep = %self.id,
                trial = %decision.trial_id,
                step = decision.step,
                value = decision.value,
                best = decision.best,
                threshold = decision.threshold,
                "early termination"
            );
            self.cancel_with_reason(
                decision.trial_id,
                CancelReason::EarlyTermination {
                    step: decision.step,
                    value: decision.value,
                    threshold: decision.threshold,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Cancel one trial on behalf of an external caller. Returns `false` if
    /// the trial had already finished.
    pub async fn cancel_trial(&mut self, trial_id: TrialId) -> SweepResult<bool> {
        self.cancel_with_reason(trial_id, CancelReason::External)
            .await
    }

    /// Mark the trial CANCELLED first, then pass the request on to the
    /// executor. Capacity is freed whether or not the executor acknowledges.
    async fn cancel_with_reason(
        &mut self,
        trial_id: TrialId,
        reason: CancelReason,
    ) -> SweepResult<bool> {
        let idx = self.index_of(&trial_id)?;
        if self.trials[idx].is_terminal() {
            return Ok(false);
        }

        self.trials[idx].mark_cancelled(reason.clone())?;
        debug!(sweep = %self.id, trial = %trial_id, reason = ?reason, "trial cancelled");
        self.emit(SweepEvent::TrialCancelled { trial_id, reason });

        if let Some(Some(mut handle)) = self.active.remove(&trial_id) {
            let call_timeout = self.config.execution.call_timeout();
            if let Err(e) = bounded(call_timeout, handle.cancel()).await {
                warn!(trial = %trial_id, error = %e, "executor did not acknowledge cancel");
            }
        }
        Ok(true)
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> SweepId {
        self.id
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// All trials in creation order.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn trial(&self, trial_id: &TrialId) -> Option<&Trial> {
        self.index.get(trial_id).map(|&idx| &self.trials[idx])
    }

    pub fn running_count(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Running)
            .count()
    }

    pub fn created_count(&self) -> usize {
        self.trials.len()
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        select_best(&self.trials, self.config.goal)
    }

    /// Handle for steering this sweep from other tasks.
    pub fn control(&self) -> SweepControl {
        SweepControl {
            tx: self.control_tx.clone(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Drain all emitted events (consuming them).
    pub fn drain_events(&mut self) -> Vec<SweepEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn report(&self) -> SweepReport {
        let count = |status: TrialStatus| self.trials.iter().filter(|t| t.status == status).count();
        SweepReport {
            sweep_id: self.id,
            name: self.config.name.clone(),
            metric_name: self.config.metric_name.clone(),
            goal: self.config.goal,
            state: self.state,
            trials: self.trials.iter().map(Trial::to_record).collect(),
            best_trial: self.best_trial().map(Trial::to_record),
            trials_completed: count(TrialStatus::Completed),
            trials_cancelled: count(TrialStatus::Cancelled),
            trials_failed: count(TrialStatus::Failed),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn index_of(&self, trial_id: &TrialId) -> SweepResult<usize> {
        self.index
            .get(trial_id)
            .copied()
            .ok_or_else(|| TrialError::NotFound { trial_id: *trial_id }.into())
    }

    fn check_invariants(&self) {
        debug_assert!(self.running_count() <= self.config.max_concurrent_trials);
        debug_assert!(self.trials.len() <= self.config.max_total_trials);
    }

    fn emit(&mut self, event: SweepEvent) {
        self.events.push(event);
    }
}

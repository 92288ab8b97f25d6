//! # hs-optimizer
//!
//! Hyperparameter sweep orchestration for Hypersweep.
//!
//! Provides the random sampler, the bandit early-termination policy, the
//! executor boundary trials are dispatched through, and the sweep controller
//! that ties them together under concurrency and trial-count limits.

mod controller;
mod dispatch;
mod executor;
mod policy;
mod report;
mod sampler;
mod simulated;

pub use controller::{SweepCommand, SweepControl, SweepController, SweepEvent};
pub use dispatch::{ComputeTarget, TrialTask, WorkerResources};
pub use executor::{ExecutorStatus, TrialExecutor, TrialHandle, TrialPoll};
pub use policy::{BanditPolicy, TerminationDecision};
pub use report::{select_best, SweepReport, SweepState};
pub use sampler::ParameterSampler;
pub use simulated::{SimulatedExecutor, SimulatedHandle, SimulationConfig};

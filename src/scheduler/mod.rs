//! Scheduling for question-pool maintenance.
//!
//! This module provides:
//! - **Priority scoring**: per (user, question) scores from answer history and preferences.
//! - **Pool monitoring**: refill decisions sized to restore pool thresholds.
//! - **Daily planning**: forward-looking assignment of questions to calendar days.
//! - **Concurrency gate**: non-blocking global and per-user admission control.
//! - **Retry policy**: transient/permanent classification and jittered backoff.
//! - **Scheduler**: the loop tying the above together, plus its admin handle.
//!
//! # Example
//!
//! ```ignore
//! use quizpool::scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new(&config, storage, registry);
//! let handle = scheduler.handle();
//! tokio::spawn(scheduler.run());
//! handle.trigger().await?;
//! ```

pub mod gate;
pub mod manager;
pub mod monitor;
pub mod planner;
pub mod priority;
pub mod retry;
pub mod state;

pub use gate::{ConcurrencyGate, GateMetrics, Rejected, Slot};
pub use manager::{RunEvent, Scheduler, SchedulerCommand, SchedulerHandle};
pub use monitor::{PoolMonitor, needs_refill, refill_target, thin_type};
pub use planner::{DailyAssignmentPlanner, PlanOutcome, PlannedDay};
pub use priority::{NEUTRAL_SCORE, PriorityScorer};
pub use retry::{ErrorClass, RetryPolicy};
pub use state::{FailureRecord, RunRecord, SchedulerState, SchedulerStatus};

//! Scheduler loop.
//!
//! A single tokio task selects over:
//! 1. The scan interval tick
//! 2. Admin commands from `SchedulerHandle`
//! 3. Run events from spawned generations
//!
//! Ticks and triggers funnel into `run_cycle`, which plans and evaluates each
//! eligible user and dispatches at most one generation per pool. Storage calls
//! are synchronous and short; provider calls only ever happen inside spawned
//! pipeline tasks, so one slow generation never stalls the loop.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, SchedulerConfig};
use crate::domain::{GenerationRequest, PoolKey, User, UserId};
use crate::error::{QuizpoolError, Result};
use crate::generator::GeneratorRegistry;
use crate::pipeline::{GeneratedBatch, GenerationPipeline, RunFailure};
use crate::scheduler::gate::{ConcurrencyGate, GateMetrics};
use crate::scheduler::monitor::PoolMonitor;
use crate::scheduler::planner::DailyAssignmentPlanner;
use crate::scheduler::retry::RetryPolicy;
use crate::scheduler::state::{FailureRecord, RunRecord, SchedulerState, SchedulerStatus};
use crate::storage::{HintStore, Storage};

/// Admin commands accepted by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run a cycle now. Ignored while paused.
    Trigger,
    /// Run a cycle for one user now, ignoring failure backoff.
    TriggerUser(UserId),
    Pause,
    Resume,
    PauseUser(UserId),
    ResumeUser(UserId),
    Shutdown,
}

/// Sent by a spawned generation when it finishes.
#[derive(Debug)]
pub struct RunEvent {
    pub run_id: u64,
    pub request: GenerationRequest,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: std::result::Result<GeneratedBatch, RunFailure>,
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Scheduler<S> {
    config: SchedulerConfig,
    storage: Arc<S>,
    gate: ConcurrencyGate,
    monitor: PoolMonitor,
    planner: DailyAssignmentPlanner,
    pipeline: GenerationPipeline<S>,
    state: Arc<Mutex<SchedulerState>>,
    tasks: JoinSet<()>,
    /// Users to re-plan once their current generation finishes.
    replan: HashSet<UserId>,
    /// Pools refused a slot last cycle; dispatched first next time.
    deferred: HashSet<PoolKey>,
    next_run_id: u64,
    /// Dropped when the loop starts so closing every handle ends it.
    command_tx: Option<mpsc::Sender<SchedulerCommand>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    event_tx: mpsc::Sender<RunEvent>,
    event_rx: mpsc::Receiver<RunEvent>,
}

impl<S: Storage + HintStore + 'static> Scheduler<S> {
    pub fn new(config: &Config, storage: Arc<S>, registry: Arc<GeneratorRegistry>) -> Self {
        let capacity = config.scheduler.channel_capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let gate = ConcurrencyGate::from_config(&config.concurrency);

        Self {
            config: config.scheduler.clone(),
            storage: storage.clone(),
            monitor: PoolMonitor::new(config),
            planner: DailyAssignmentPlanner::new(config),
            pipeline: GenerationPipeline::new(config, storage, registry, gate.clone()),
            gate,
            state: Arc::new(Mutex::new(SchedulerState::new(&config.scheduler))),
            tasks: JoinSet::new(),
            replan: HashSet::new(),
            deferred: HashSet::new(),
            next_run_id: 1,
            command_tx: Some(command_tx),
            command_rx,
            event_tx,
            event_rx,
        }
    }

    /// Replace the retry policy used by dispatched runs.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.pipeline = self.pipeline.with_retry(retry);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        let commands = match &self.command_tx {
            Some(tx) => tx.clone(),
            None => mpsc::channel(1).0,
        };
        SchedulerHandle {
            commands,
            state: self.state.clone(),
            gate: self.gate.clone(),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Run until `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        self.command_tx = None;
        lock_state(&self.state).running = true;
        tracing::info!(
            scan_interval_secs = self.config.scan_interval_secs,
            paused = lock_state(&self.state).paused,
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if lock_state(&self.state).paused {
                        tracing::debug!("Scheduler paused, skipping tick");
                    } else {
                        self.run_cycle(None);
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        None | Some(SchedulerCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event, true);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        tracing::info!(command = ?command, "Scheduler command");
        match command {
            SchedulerCommand::Trigger => {
                if lock_state(&self.state).paused {
                    tracing::info!("Scheduler paused, ignoring trigger");
                } else {
                    self.run_cycle(None);
                }
            }
            SchedulerCommand::TriggerUser(user) => self.run_cycle(Some(user)),
            SchedulerCommand::Pause => lock_state(&self.state).paused = true,
            SchedulerCommand::Resume => lock_state(&self.state).paused = false,
            SchedulerCommand::PauseUser(user) => lock_state(&self.state).pause_user(user),
            SchedulerCommand::ResumeUser(user) => lock_state(&self.state).resume_user(user),
            SchedulerCommand::Shutdown => {}
        }
    }

    /// Plan and evaluate every eligible user, then dispatch the merged requests.
    ///
    /// `only` restricts the cycle to one user and skips the backoff check.
    pub fn run_cycle(&mut self, only: Option<UserId>) {
        self.reap_completed();

        let now = Utc::now();
        {
            let mut state = lock_state(&self.state);
            state.cycles += 1;
            state.last_cycle_started = Some(now);
        }

        let users = match only {
            Some(id) => self.storage.get_user(id).map(|u| u.into_iter().collect::<Vec<_>>()),
            None => self.storage.list_users(),
        };
        let users: Vec<User> = match users {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list users, skipping cycle");
                self.finish_cycle(now);
                return;
            }
        };

        let eligible: Vec<User> = users
            .into_iter()
            .filter(|u| self.is_eligible(u, now, only.is_some()))
            .collect();

        let mut requests: BTreeMap<PoolKey, GenerationRequest> = BTreeMap::new();
        for user in &eligible {
            for request in self.cycle_user(user, now) {
                match requests.get_mut(&request.pool) {
                    Some(existing) => existing.absorb(request),
                    None => {
                        requests.insert(request.pool.clone(), request);
                    }
                }
            }
        }

        let mut ordered: Vec<GenerationRequest> = requests.into_values().collect();
        ordered.sort_by_key(|r| !self.deferred.contains(&r.pool));
        if only.is_none() {
            self.deferred.clear();
        }
        for request in ordered {
            self.dispatch(request);
        }
        self.finish_cycle(now);
    }

    fn finish_cycle(&self, started: DateTime<Utc>) {
        let finished = Utc::now();
        let mut state = lock_state(&self.state);
        state.last_cycle_finished = Some(finished);
        state.next_cycle_at = chrono::Duration::from_std(self.config.scan_interval())
            .ok()
            .map(|interval| started + interval);
        tracing::debug!(cycle = state.cycles, elapsed_ms = (finished - started).num_milliseconds(), "Cycle finished");
    }

    fn is_eligible(&self, user: &User, now: DateTime<Utc>, forced: bool) -> bool {
        if !self.monitor.is_active(user, now) {
            return false;
        }
        let state = lock_state(&self.state);
        if state.is_user_paused(user.id) {
            return false;
        }
        forced || !state.in_backoff(user.id, now)
    }

    /// Plan the user's horizon under a per-user slot, then evaluate the pool.
    fn cycle_user(&mut self, user: &User, now: DateTime<Utc>) -> Vec<GenerationRequest> {
        let mut requests = Vec::with_capacity(2);

        if let Some(request) = self.plan_user(user, now) {
            self.replan.insert(user.id);
            requests.push(request);
        }

        match self.monitor.evaluate(self.storage.as_ref(), user, &self.gate, now) {
            Ok(Some(request)) => requests.push(request),
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id = %user.id, error = %e, "Pool evaluation failed"),
        }
        requests
    }

    fn plan_user(&mut self, user: &User, now: DateTime<Utc>) -> Option<GenerationRequest> {
        let mut slot = match self.gate.try_acquire(user.id, None) {
            Ok(slot) => slot,
            Err(rejected) => {
                // A generation for this user is in flight; re-plan when it reports.
                tracing::debug!(user_id = %user.id, reason = %rejected, "Planning deferred");
                self.replan.insert(user.id);
                return None;
            }
        };

        let today = user.today(now);
        let outcome = self
            .planner
            .plan_horizon(self.storage.as_ref(), user, self.planner.horizon_days(), today, now);
        slot.release();

        match outcome {
            Ok(outcome) => {
                tracing::debug!(
                    user_id = %user.id,
                    rows = outcome.total_rows(),
                    shortfall = outcome.total_shortfall(),
                    "Planned assignments"
                );
                outcome.request
            }
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Planning failed");
                None
            }
        }
    }

    fn dispatch(&mut self, request: GenerationRequest) {
        if self.gate.in_flight_for_pool(&request.pool) > 0 {
            tracing::debug!(pool = %request.pool, "Generation already in flight");
            return;
        }

        let slot = match self.gate.try_acquire(request.user(), Some(request.pool.clone())) {
            Ok(slot) => slot,
            Err(rejected) => {
                lock_state(&self.state).dispatch_rejected += 1;
                self.deferred.insert(request.pool.clone());
                tracing::info!(pool = %request.pool, reason = %rejected, "Dispatch rejected, retrying next cycle");
                return;
            }
        };

        self.deferred.remove(&request.pool);
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        lock_state(&self.state).runs_started += 1;

        tracing::info!(
            run_id = run_id,
            pool = %request.pool,
            question_type = %request.question_type,
            target_count = request.target_count,
            provider = %request.provider,
            "Dispatching generation"
        );

        let pipeline = self.pipeline.clone();
        let events = self.event_tx.clone();
        self.tasks.spawn(async move {
            let started_at = Utc::now();
            let result = pipeline.run_with_slot(request.clone(), slot).await;
            let event = RunEvent {
                run_id,
                request,
                started_at,
                finished_at: Utc::now(),
                result,
            };
            if events.send(event).await.is_err() {
                tracing::debug!(run_id = run_id, "Scheduler gone, dropping run event");
            }
        });
    }

    fn handle_event(&mut self, event: RunEvent, allow_replan: bool) {
        let user = event.request.user();

        let summary = match &event.result {
            Ok(batch) => format!(
                "generated {} {} question(s) in {} call(s)",
                batch.question_ids.len(),
                batch.question_type,
                batch.calls
            ),
            Err(failure) => failure.to_string(),
        };
        let record = RunRecord {
            run_id: event.run_id,
            user,
            language: event.request.pool.language.clone(),
            level: event.request.pool.level.clone(),
            question_type: event.request.question_type,
            origin: event.request.origin,
            started_at: event.started_at,
            finished_at: event.finished_at,
            success: event.result.is_ok(),
            summary,
        };
        lock_state(&self.state).record_run(record, event.result.as_ref().err());

        if allow_replan && self.replan.remove(&user) {
            self.replan_user(user);
        }
    }

    /// Re-plan after a generation. A remaining shortfall waits for the next cycle.
    fn replan_user(&mut self, user: UserId) {
        let user = match self.storage.get_user(user) {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Failed to load user for re-plan");
                return;
            }
        };
        let now = Utc::now();
        if self.plan_user(&user, now).is_some() {
            tracing::debug!(user_id = %user.id, "Shortfall remains after generation");
            self.replan.remove(&user.id);
        }
    }

    fn reap_completed(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Generation task panicked");
                }
            }
        }
    }

    /// Stop dispatching, wait for in-flight runs up to the timeout, abort the rest.
    async fn shutdown(&mut self) {
        lock_state(&self.state).running = false;
        let pending = self.tasks.len();
        tracing::info!(in_flight = pending, "Scheduler shutting down");

        if pending > 0 {
            let tasks = &mut self.tasks;
            let drained = tokio::time::timeout(self.config.shutdown_timeout(), async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(remaining = self.tasks.len(), "Shutdown timeout reached, aborting generations");
                self.tasks.shutdown().await;
            }
        }

        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event, false);
        }
        tracing::info!("Scheduler stopped");
    }
}

/// Cloneable admin surface for a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    state: Arc<Mutex<SchedulerState>>,
    gate: ConcurrencyGate,
}

impl SchedulerHandle {
    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| QuizpoolError::InvalidState("scheduler is not running".to_string()))
    }

    pub async fn trigger(&self) -> Result<()> {
        self.send(SchedulerCommand::Trigger).await
    }

    pub async fn trigger_user(&self, user: UserId) -> Result<()> {
        self.send(SchedulerCommand::TriggerUser(user)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(SchedulerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SchedulerCommand::Resume).await
    }

    pub async fn pause_user(&self, user: UserId) -> Result<()> {
        self.send(SchedulerCommand::PauseUser(user)).await
    }

    pub async fn resume_user(&self, user: UserId) -> Result<()> {
        self.send(SchedulerCommand::ResumeUser(user)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerCommand::Shutdown).await
    }

    pub fn status(&self) -> SchedulerStatus {
        lock_state(&self.state).snapshot(self.gate.in_flight(), Utc::now())
    }

    pub fn gate_metrics(&self) -> GateMetrics {
        self.gate.metrics()
    }

    /// Recent runs, newest first.
    pub fn history(&self) -> Vec<RunRecord> {
        lock_state(&self.state).history()
    }

    /// Recent failures, newest first.
    pub fn failures(&self) -> Vec<FailureRecord> {
        lock_state(&self.state).failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::{GenerationHint, QuestionType};
    use crate::generator::{GeneratorError, MockGenerator, ProviderCapabilities};
    use crate::storage::SqliteStorage;

    struct Harness {
        storage: Arc<SqliteStorage>,
        mock: Arc<MockGenerator>,
        scheduler: Scheduler<SqliteStorage>,
        user: UserId,
    }

    fn harness(mock: MockGenerator, tweak: impl FnOnce(&mut Config)) -> Harness {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let user = storage.insert_user("alice", "italian", "A2", Some("mock")).unwrap();
        let mock = Arc::new(mock);
        let mut registry = GeneratorRegistry::new();
        registry.register(
            ProviderCapabilities {
                code: "mock".to_string(),
                batch_size: 10,
                supports_grammar: true,
            },
            mock.clone(),
        );

        let mut config = Config::default();
        config.scheduler.scan_interval_secs = 3600;
        config.scheduler.shutdown_timeout_secs = 1;
        tweak(&mut config);

        let scheduler = Scheduler::new(&config, storage.clone(), Arc::new(registry))
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)));
        Harness {
            storage,
            mock,
            scheduler,
            user,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_one_generation_per_pool_while_in_flight() {
        let h = harness(MockGenerator::new().with_delay(Duration::from_millis(300)), |_| {});
        let handle = h.scheduler.handle();
        let gate = h.scheduler.gate().clone();
        let pool = PoolKey::new(h.user, "italian", "A2");
        let task = tokio::spawn(h.scheduler.run());

        assert!(wait_for(|| gate.in_flight_for_pool(&pool) == 1).await);
        handle.trigger().await.unwrap();
        handle.trigger().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().runs_started, 1);
        assert!(gate.in_flight() <= 1);

        assert!(wait_for(|| handle.status().runs_completed == 1).await);
        assert_eq!(h.mock.calls(), 1);
        assert_eq!(handle.status().runs_started, 1);
        assert_eq!(h.storage.candidate_questions(&pool).unwrap().len(), 10);

        // The finished generation triggered a re-plan that filled today's goal.
        let today = Utc::now().date_naive();
        assert_eq!(h.storage.assignments_for(h.user, today).unwrap().len(), 10);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hinted_type_wins_over_planner_shortfall() {
        let mut h = harness(MockGenerator::new(), |_| {});
        let now = Utc::now();
        h.storage
            .upsert_hint(&GenerationHint::expiring_in(
                h.user,
                "italian",
                "A2",
                QuestionType::ReadingComprehension,
                now,
                chrono::Duration::minutes(10),
            ))
            .unwrap();

        // Empty pool with the default goal of 10: the planner is short too.
        h.scheduler.run_cycle(None);
        let gate = h.scheduler.gate().clone();
        assert!(wait_for(|| h.mock.calls() == 1 && gate.in_flight() == 0).await);

        let prompts = h.mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].question_type, QuestionType::ReadingComprehension);
        assert_eq!(prompts[0].count, 10);
        assert!(h.storage.active_hints(h.user, Utc::now()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_pool_is_dispatched_first_next_cycle() {
        let h = harness(MockGenerator::new().with_delay(Duration::from_millis(100)), |c| {
            c.concurrency.max_global = 1;
        });
        let bob = h.storage.insert_user("bob", "spanish", "B1", Some("mock")).unwrap();
        let mut scheduler = h.scheduler;
        let gate = scheduler.gate().clone();

        scheduler.run_cycle(None);
        assert_eq!(gate.in_flight_for_user(h.user), 1);
        assert_eq!(gate.in_flight_for_user(bob), 0);
        assert!(wait_for(|| gate.in_flight() == 0).await);

        // Alice still needs other question types, but bob waited a cycle.
        scheduler.run_cycle(None);
        assert_eq!(gate.in_flight_for_user(bob), 1);
        assert_eq!(gate.in_flight_for_user(h.user), 0);
        assert!(wait_for(|| gate.in_flight() == 0).await);
    }

    #[tokio::test]
    async fn test_paused_scheduler_ignores_ticks_and_triggers() {
        let h = harness(MockGenerator::new(), |c| c.scheduler.start_paused = true);
        let handle = h.scheduler.handle();
        let task = tokio::spawn(h.scheduler.run());

        handle.trigger().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.status().paused);
        assert_eq!(handle.status().cycles, 0);
        assert_eq!(h.mock.calls(), 0);

        handle.resume().await.unwrap();
        handle.trigger().await.unwrap();
        assert!(wait_for(|| handle.status().runs_completed == 1).await);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_paused_user_is_skipped() {
        let h = harness(MockGenerator::new(), |c| c.scheduler.start_paused = true);
        let handle = h.scheduler.handle();
        let user = h.user;
        let task = tokio::spawn(h.scheduler.run());

        handle.pause_user(user).await.unwrap();
        handle.resume().await.unwrap();
        handle.trigger().await.unwrap();
        handle.trigger_user(user).await.unwrap();
        assert!(wait_for(|| handle.status().cycles == 2).await);
        assert_eq!(h.mock.calls(), 0);
        assert_eq!(handle.status().paused_users, vec![user]);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failure_sets_backoff_and_trigger_user_overrides_it() {
        let mock = MockGenerator::with_script(vec![Err(GeneratorError::Auth("bad key".to_string()))]);
        let h = harness(mock, |_| {});
        let handle = h.scheduler.handle();
        let user = h.user;
        let task = tokio::spawn(h.scheduler.run());

        assert!(wait_for(|| handle.status().runs_failed == 1).await);
        assert_eq!(handle.status().users_in_backoff, vec![user]);
        assert_eq!(handle.failures().len(), 1);
        assert!(!handle.history()[0].success);

        handle.trigger().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().runs_started, 1);

        handle.trigger_user(user).await.unwrap();
        assert!(wait_for(|| handle.status().runs_completed == 1).await);
        assert!(handle.status().users_in_backoff.is_empty());

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_aborts_slow_runs_and_releases_slots() {
        let h = harness(MockGenerator::new().with_delay(Duration::from_secs(30)), |_| {});
        let handle = h.scheduler.handle();
        let gate = h.scheduler.gate().clone();
        let pool = PoolKey::new(h.user, "italian", "A2");
        let task = tokio::spawn(h.scheduler.run());

        assert!(wait_for(|| gate.in_flight() == 1).await);
        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(gate.in_flight(), 0);
        assert!(!handle.status().running);
        assert!(h.storage.candidate_questions(&pool).unwrap().is_empty());
        assert!(handle.trigger().await.is_err());
    }
}

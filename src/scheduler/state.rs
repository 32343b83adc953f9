//! Scheduler state shared with the admin handle.
//!
//! The loop is the only writer. Admin readers take short snapshots through the
//! handle; nothing here is persisted.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::domain::{QuestionType, RequestOrigin, UserId};
use crate::pipeline::{FailureKind, RunFailure};

/// One finished generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: u64,
    pub user: UserId,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub origin: RequestOrigin,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub user: UserId,
    pub language: String,
    pub level: String,
    pub attempts: u32,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_failure(failure: &RunFailure, at: DateTime<Utc>) -> Self {
        Self {
            user: failure.pool.user,
            language: failure.pool.language.clone(),
            level: failure.pool.level.clone(),
            attempts: failure.attempts,
            kind: failure.kind,
            message: failure.message.clone(),
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    consecutive_failures: u32,
    until: DateTime<Utc>,
}

/// Point-in-time view for admin consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub paused: bool,
    pub paused_users: Vec<UserId>,
    pub users_in_backoff: Vec<UserId>,
    pub cycles: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub dispatch_rejected: u64,
    pub in_flight: usize,
    pub last_cycle_started: Option<DateTime<Utc>>,
    pub last_cycle_finished: Option<DateTime<Utc>>,
    pub next_cycle_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SchedulerState {
    pub running: bool,
    pub paused: bool,
    paused_users: BTreeSet<UserId>,
    backoff: HashMap<UserId, Backoff>,
    pub cycles: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub dispatch_rejected: u64,
    pub last_cycle_started: Option<DateTime<Utc>>,
    pub last_cycle_finished: Option<DateTime<Utc>>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    history: VecDeque<RunRecord>,
    failures: VecDeque<FailureRecord>,
    max_history: usize,
    max_failures: usize,
    backoff_max: Duration,
}

impl SchedulerState {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            running: false,
            paused: config.start_paused,
            paused_users: BTreeSet::new(),
            backoff: HashMap::new(),
            cycles: 0,
            runs_started: 0,
            runs_completed: 0,
            runs_failed: 0,
            dispatch_rejected: 0,
            last_cycle_started: None,
            last_cycle_finished: None,
            next_cycle_at: None,
            history: VecDeque::new(),
            failures: VecDeque::new(),
            max_history: config.max_history,
            max_failures: config.max_failure_records,
            backoff_max: Duration::from_secs(config.user_backoff_max_secs),
        }
    }

    pub fn pause_user(&mut self, user: UserId) {
        self.paused_users.insert(user);
    }

    pub fn resume_user(&mut self, user: UserId) {
        self.paused_users.remove(&user);
    }

    pub fn is_user_paused(&self, user: UserId) -> bool {
        self.paused_users.contains(&user)
    }

    pub fn in_backoff(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.backoff.get(&user).is_some_and(|b| b.until > now)
    }

    /// Delay after `failures` consecutive failures: `2^failures` seconds, capped.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let secs = 1u64 << failures.min(32);
        Duration::from_secs(secs).min(self.backoff_max)
    }

    pub fn record_run(&mut self, record: RunRecord, failure: Option<&RunFailure>) {
        if record.success {
            self.runs_completed += 1;
            self.backoff.remove(&record.user);
        } else {
            self.runs_failed += 1;
            let failures = self
                .backoff
                .get(&record.user)
                .map_or(1, |b| b.consecutive_failures.saturating_add(1));
            let delay = self.backoff_for(failures);
            let until = record.finished_at + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            self.backoff.insert(
                record.user,
                Backoff {
                    consecutive_failures: failures,
                    until,
                },
            );
            tracing::info!(user_id = %record.user, failures = failures, until = %until, "User in failure backoff");
        }

        if let Some(failure) = failure {
            push_bounded(&mut self.failures, FailureRecord::from_failure(failure, record.finished_at), self.max_failures);
        }
        push_bounded(&mut self.history, record, self.max_history);
    }

    /// Newest first.
    pub fn history(&self) -> Vec<RunRecord> {
        self.history.iter().rev().cloned().collect()
    }

    /// Newest first.
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures.iter().rev().cloned().collect()
    }

    pub fn snapshot(&self, in_flight: usize, now: DateTime<Utc>) -> SchedulerStatus {
        let mut users_in_backoff: Vec<UserId> = self
            .backoff
            .iter()
            .filter(|(_, b)| b.until > now)
            .map(|(u, _)| *u)
            .collect();
        users_in_backoff.sort();

        SchedulerStatus {
            running: self.running,
            paused: self.paused,
            paused_users: self.paused_users.iter().copied().collect(),
            users_in_backoff,
            cycles: self.cycles,
            runs_started: self.runs_started,
            runs_completed: self.runs_completed,
            runs_failed: self.runs_failed,
            dispatch_rejected: self.dispatch_rejected,
            in_flight,
            last_cycle_started: self.last_cycle_started,
            last_cycle_finished: self.last_cycle_finished,
            next_cycle_at: self.next_cycle_at,
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    if max == 0 {
        return;
    }
    while queue.len() >= max {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PoolKey;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_history: 2,
            max_failure_records: 2,
            user_backoff_max_secs: 10,
            ..Default::default()
        }
    }

    fn record(run_id: u64, user: i64, success: bool, at: DateTime<Utc>) -> RunRecord {
        RunRecord {
            run_id,
            user: UserId(user),
            language: "italian".to_string(),
            level: "A2".to_string(),
            question_type: QuestionType::Vocabulary,
            origin: RequestOrigin::PoolMonitor,
            started_at: at,
            finished_at: at,
            success,
            summary: String::new(),
        }
    }

    fn failure(user: i64) -> RunFailure {
        RunFailure {
            pool: PoolKey::new(UserId(user), "italian", "A2"),
            question_type: QuestionType::Vocabulary,
            kind: FailureKind::TransientExhausted,
            message: "timeout".to_string(),
            attempts: 3,
        }
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let mut state = SchedulerState::new(&config());
        let now = Utc::now();
        for id in 1..=3 {
            state.record_run(record(id, 1, true, now), None);
        }
        let ids: Vec<u64> = state.history().iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(state.runs_completed, 3);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let state = SchedulerState::new(&config());
        assert_eq!(state.backoff_for(1), Duration::from_secs(2));
        assert_eq!(state.backoff_for(3), Duration::from_secs(8));
        assert_eq!(state.backoff_for(4), Duration::from_secs(10));
        assert_eq!(state.backoff_for(200), Duration::from_secs(10));
    }

    #[test]
    fn test_failure_sets_backoff_and_success_clears_it() {
        let mut state = SchedulerState::new(&config());
        let now = Utc::now();
        let f = failure(7);

        state.record_run(record(1, 7, false, now), Some(&f));
        assert!(state.in_backoff(UserId(7), now + chrono::Duration::seconds(1)));
        assert!(!state.in_backoff(UserId(7), now + chrono::Duration::seconds(3)));
        assert!(!state.in_backoff(UserId(8), now));

        state.record_run(record(2, 7, false, now), Some(&f));
        assert!(state.in_backoff(UserId(7), now + chrono::Duration::seconds(3)));

        state.record_run(record(3, 7, true, now), None);
        assert!(!state.in_backoff(UserId(7), now));
        assert_eq!(state.failures().len(), 2);
        assert_eq!(state.failures()[0].kind, FailureKind::TransientExhausted);
    }

    #[test]
    fn test_pause_users_and_snapshot() {
        let mut cfg = config();
        cfg.start_paused = true;
        let mut state = SchedulerState::new(&cfg);
        state.pause_user(UserId(2));
        state.pause_user(UserId(1));
        assert!(state.is_user_paused(UserId(1)));
        state.resume_user(UserId(1));

        let status = state.snapshot(0, Utc::now());
        assert!(status.paused);
        assert_eq!(status.paused_users, vec![UserId(2)]);
    }
}

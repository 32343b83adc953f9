//! Pool refill evaluation.
//!
//! A pool needs a refill when any question type holds fewer than
//! `question_refill_threshold` questions, the pool as a whole does, or its fresh
//! share is below `daily_fresh_question_ratio`. One request per pool is emitted,
//! for the scarcest type, sized so one batch restores the aggregate thresholds
//! and that type's own count. While a generation for the pool holds a gate
//! slot, evaluation emits nothing.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::domain::{GenerationRequest, PoolKey, PoolStats, QuestionType, RequestOrigin, User};
use crate::error::Result;
use crate::scheduler::gate::ConcurrencyGate;
use crate::storage::{HintStore, Storage};

/// Whether a pool is below either threshold.
pub fn needs_refill(stats: &PoolStats, threshold: usize, ratio: f64) -> bool {
    stats.pool_count < threshold || stats.fresh_ratio() < ratio
}

/// The scarcest question type when it is below `threshold`, with its deficit.
pub fn thin_type(stats: &PoolStats, threshold: usize) -> Option<(QuestionType, usize)> {
    let scarcest = stats.scarcest_type();
    let count = stats.by_type.get(&scarcest).copied().unwrap_or(0);
    (count < threshold).then(|| (scarcest, threshold - count))
}

/// Smallest `n` such that adding `n` fresh questions meets both thresholds.
pub fn refill_target(stats: &PoolStats, threshold: usize, ratio: f64) -> usize {
    let pool = stats.pool_count;
    let fresh = stats.fresh_count.min(pool);
    let satisfied = |n: usize| {
        let p = pool + n;
        let f = fresh + n;
        p >= threshold && (if p == 0 { ratio <= 0.0 } else { f as f64 / p as f64 >= ratio })
    };

    let mut n = threshold.saturating_sub(pool);
    if ratio > 0.0 && ratio < 1.0 {
        let estimate = (ratio * pool as f64 - fresh as f64) / (1.0 - ratio);
        if estimate > 0.0 {
            n = n.max(estimate.ceil() as usize);
        }
    }
    // Correct floating-point drift in either direction. Both constraints are
    // monotonic in n and ratio < 1 bounds the upward walk.
    if ratio < 1.0 {
        while !satisfied(n) {
            n += 1;
        }
    }
    while n > 0 && satisfied(n - 1) {
        n -= 1;
    }
    n
}

#[derive(Debug, Clone)]
pub struct PoolMonitor {
    threshold: usize,
    fresh_ratio: f64,
    repeat_avoid_days: u32,
    active_window_days: u32,
    default_provider: String,
    batch_sizes: HashMap<String, usize>,
}

impl PoolMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            threshold: config.pool.question_refill_threshold,
            fresh_ratio: config.pool.daily_fresh_question_ratio,
            repeat_avoid_days: config.daily.daily_repeat_avoid_days,
            active_window_days: config.scheduler.active_window_days,
            default_provider: config.generation.default_provider.clone(),
            batch_sizes: config
                .providers
                .iter()
                .map(|p| (p.code.clone(), p.batch_size.max(1)))
                .collect(),
        }
    }

    /// Active users have recent activity or generation enabled with a provider.
    pub fn is_active(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.active_within(self.active_window_days, now) || (user.ai_enabled && user.ai_provider.is_some())
    }

    pub fn provider_for(&self, user: &User) -> String {
        user.ai_provider
            .clone()
            .unwrap_or_else(|| self.default_provider.clone())
    }

    /// Current pool counts with the repeat-avoid window applied.
    pub fn stats<S: Storage + ?Sized>(&self, storage: &S, pool: &PoolKey, now: DateTime<Utc>) -> Result<PoolStats> {
        let correct_since = now - Duration::days(i64::from(self.repeat_avoid_days));
        storage.pool_stats(pool, correct_since)
    }

    /// Decide whether the user's current pool needs a generation request.
    pub fn evaluate<S: Storage + HintStore + ?Sized>(
        &self,
        storage: &S,
        user: &User,
        gate: &ConcurrencyGate,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationRequest>> {
        if !user.ai_enabled {
            return Ok(None);
        }

        let pool = user.pool_key();
        if gate.in_flight_for_pool(&pool) > 0 {
            tracing::debug!(pool = %pool, "Generation already in flight, skipping evaluation");
            return Ok(None);
        }

        let stats = self.stats(storage, &pool, now)?;
        let hint = storage
            .active_hints(user.id, now)?
            .into_iter()
            .find(|h| h.matches_pool(&pool.language, &pool.level));
        let provider = self.provider_for(user);
        let target = refill_target(&stats, self.threshold, self.fresh_ratio);

        let (question_type, target_count, hinted) = match hint {
            // A hinted type is treated as empty: always generate at least one batch.
            Some(hint) => {
                let batch = self.batch_sizes.get(&provider).copied().unwrap_or(1);
                (hint.question_type, target.max(batch), true)
            }
            None => match thin_type(&stats, self.threshold) {
                Some((question_type, deficit)) => (question_type, target.max(deficit), false),
                None if needs_refill(&stats, self.threshold, self.fresh_ratio) => {
                    (stats.scarcest_type(), target, false)
                }
                None => return Ok(None),
            },
        };

        tracing::info!(
            pool = %pool,
            pool_count = stats.pool_count,
            fresh_count = stats.fresh_count,
            target_count = target_count,
            question_type = %question_type,
            hinted = hinted,
            "Pool needs refill"
        );

        Ok(Some(GenerationRequest {
            pool,
            question_type,
            topic: None,
            target_count: target_count.max(1),
            origin: RequestOrigin::PoolMonitor,
            provider,
            hinted,
        }))
    }
}

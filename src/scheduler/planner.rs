//! Daily assignment planning.
//!
//! For each day in the horizon the planner keeps completed rows, then fills the
//! remaining `daily_goal` slots from the user's pool by priority score
//! (descending, lowest question id on ties). Questions answered correctly within
//! the repeat-avoid window, measured back from each target day, are held back;
//! `RepeatPolicy` decides whether they may be reused when nothing else is left. Each day is written with one
//! delete-then-insert transaction, so re-planning the same state converges to the
//! same rows.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::config::{Config, RepeatPolicy};
use crate::domain::{CandidateQuestion, GenerationRequest, QuestionId, RequestOrigin, User, UserId};
use crate::error::Result;
use crate::scheduler::priority::PriorityScorer;
use crate::storage::Storage;

/// The assignment set for one day after planning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedDay {
    pub date: NaiveDate,
    /// Completed rows first, then new picks in priority order.
    pub questions: Vec<QuestionId>,
    pub completed: usize,
    /// Recently-correct questions placed to reach the goal.
    pub reused: Vec<QuestionId>,
    pub shortfall: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub user: UserId,
    pub days: Vec<PlannedDay>,
    /// Generation needed to fill the days left short.
    pub request: Option<GenerationRequest>,
}

impl PlanOutcome {
    pub fn total_shortfall(&self) -> usize {
        self.days.iter().map(|d| d.shortfall).sum()
    }

    pub fn total_rows(&self) -> usize {
        self.days.iter().map(|d| d.questions.len()).sum()
    }
}

/// Order candidates by score descending, then question id ascending.
pub fn rank<'a>(candidates: &'a [CandidateQuestion], scores: &HashMap<QuestionId, f64>) -> Vec<&'a CandidateQuestion> {
    let mut ranked: Vec<&CandidateQuestion> = candidates.iter().collect();
    ranked.sort_by(|a, b| {
        let sa = scores.get(&a.id).copied().unwrap_or(0.0);
        let sb = scores.get(&b.id).copied().unwrap_or(0.0);
        sb.total_cmp(&sa).then(a.id.cmp(&b.id))
    });
    ranked
}

/// Pick up to `needed` questions not in `taken`. Returns (picks, reused).
fn select_day(
    ranked: &[&CandidateQuestion],
    taken: &HashSet<QuestionId>,
    needed: usize,
    avoid_since: DateTime<Utc>,
    policy: RepeatPolicy,
) -> (Vec<QuestionId>, Vec<QuestionId>) {
    let recently_correct = |c: &CandidateQuestion| c.last_correct_at.is_some_and(|at| at >= avoid_since);

    let mut picks: Vec<QuestionId> = ranked
        .iter()
        .filter(|c| !taken.contains(&c.id) && !recently_correct(c))
        .take(needed)
        .map(|c| c.id)
        .collect();

    let mut reused = Vec::new();
    if picks.len() < needed && policy == RepeatPolicy::PreferGoal {
        reused = ranked
            .iter()
            .filter(|c| !taken.contains(&c.id) && recently_correct(c))
            .take(needed - picks.len())
            .map(|c| c.id)
            .collect();
        picks.extend(reused.iter().copied());
    }

    (picks, reused)
}

#[derive(Debug, Clone)]
pub struct DailyAssignmentPlanner {
    horizon_days: u32,
    repeat_avoid_days: u32,
    policy: RepeatPolicy,
    scorer: PriorityScorer,
    default_provider: String,
}

impl DailyAssignmentPlanner {
    pub fn new(config: &Config) -> Self {
        Self {
            horizon_days: config.daily.daily_horizon_days,
            repeat_avoid_days: config.daily.daily_repeat_avoid_days,
            policy: config.daily.repeat_policy,
            scorer: PriorityScorer::new(config.priority.clone()),
            default_provider: config.generation.default_provider.clone(),
        }
    }

    /// Configured horizon length in days.
    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Plan `horizon_days` days starting at `today`.
    pub fn plan_horizon<S: Storage + ?Sized>(
        &self,
        storage: &S,
        user: &User,
        horizon_days: u32,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PlanOutcome> {
        let prefs = storage.learning_preferences(user.id)?;
        let goal = prefs.goal();
        let pool = user.pool_key();
        let window = Duration::days(i64::from(self.repeat_avoid_days));
        let avoid_since = now - window;

        let candidates = storage.candidate_questions(&pool)?;
        let ids: Vec<QuestionId> = candidates.iter().map(|c| c.id).collect();
        let scores = self.scorer.scores_for(storage, user.id, &prefs, &ids, now);
        let ranked = rank(&candidates, &scores);

        let dates: Vec<NaiveDate> = (0..horizon_days.max(1))
            .map(|offset| today + Duration::days(i64::from(offset)))
            .collect();

        // Completed rows anywhere in the horizon are never placed again.
        let mut existing = Vec::with_capacity(dates.len());
        let mut taken: HashSet<QuestionId> = HashSet::new();
        for date in &dates {
            let rows = storage.assignments_for(user.id, *date)?;
            taken.extend(rows.iter().filter(|r| r.is_completed).map(|r| r.question));
            existing.push(rows);
        }

        let mut days = Vec::with_capacity(dates.len());
        for (date, rows) in dates.into_iter().zip(existing) {
            let completed: Vec<QuestionId> = rows.iter().filter(|r| r.is_completed).map(|r| r.question).collect();
            let needed = goal.saturating_sub(completed.len());
            let day_avoid_since = avoid_since + (date - today);
            let (picks, reused) = select_day(&ranked, &taken, needed, day_avoid_since, self.policy);

            storage.replace_assignments(user.id, date, &picks)?;
            taken.extend(picks.iter().copied());

            let shortfall = needed - picks.len();
            if !reused.is_empty() {
                tracing::info!(user_id = %user.id, date = %date, reused = reused.len(), "Reused recently-correct questions");
            }
            if shortfall > 0 {
                tracing::info!(user_id = %user.id, date = %date, shortfall = shortfall, "Day under-filled");
            }

            let mut questions = completed.clone();
            questions.extend(picks);
            days.push(PlannedDay {
                date,
                questions,
                completed: completed.len(),
                reused,
                shortfall,
            });
        }

        let total_shortfall: usize = days.iter().map(|d| d.shortfall).sum();
        let request = if total_shortfall > 0 && user.ai_enabled {
            let stats = storage.pool_stats(&pool, avoid_since)?;
            Some(GenerationRequest {
                pool,
                question_type: stats.scarcest_type(),
                topic: None,
                target_count: total_shortfall,
                origin: RequestOrigin::Planner,
                provider: user
                    .ai_provider
                    .clone()
                    .unwrap_or_else(|| self.default_provider.clone()),
                hinted: false,
            })
        } else {
            None
        };

        Ok(PlanOutcome {
            user: user.id,
            days,
            request,
        })
    }
}

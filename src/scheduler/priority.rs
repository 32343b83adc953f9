//! Priority calculation for question selection.
//!
//! Scores are multiplicative, starting from a base of 100:
//! - Recency boost: +10% per day since the question was last seen, capped at 5x
//! - Weak-area boost: `weak_area_boost` when the topic is one the user struggles with
//! - Known penalty: `known_question_penalty` when answered correctly within `review_interval_days`
//! - Freshness: `1 + fresh_question_ratio` for questions with no history at all
//!
//! Only relative order matters. Recomputation is best-effort: any storage
//! failure yields `NEUTRAL_SCORE` rather than an error.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::PriorityConfig;
use crate::domain::{LearningPreferences, PriorityScore, QuestionHistory, QuestionId, TopicStat, UserId};
use crate::storage::Storage;

/// Starting score before any multiplier.
pub const BASE_SCORE: f64 = 100.0;
/// Returned when history cannot be read.
pub const NEUTRAL_SCORE: f64 = BASE_SCORE;
/// Recency boost per day since last seen.
pub const RECENCY_BOOST_PER_DAY: f64 = 0.1;
/// Maximum recency multiplier.
pub const RECENCY_BOOST_MAX: f64 = 5.0;

#[derive(Debug, Clone, Default)]
pub struct PriorityScorer {
    config: PriorityConfig,
}

impl PriorityScorer {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    /// Score one question for one user. Pure.
    pub fn score(
        &self,
        prefs: &LearningPreferences,
        history: &QuestionHistory,
        weak_topics: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut score = BASE_SCORE;

        if let Some(seen) = history.last_seen_at {
            let days = (now - seen).num_seconds().max(0) as f64 / 86_400.0;
            score *= (1.0 + RECENCY_BOOST_PER_DAY * days).min(RECENCY_BOOST_MAX);
        }

        if prefs.focus_on_weak_areas && weak_topics.contains(&history.topic) {
            score *= prefs.weak_area_boost;
        }

        if let Some(correct_at) = history.last_correct_at {
            if now - correct_at < Duration::days(i64::from(prefs.review_interval_days)) {
                score *= prefs.known_question_penalty;
            }
        }

        if history.is_unseen() {
            score *= 1.0 + prefs.fresh_question_ratio;
        }

        score
    }

    /// Topics whose recent incorrect-rate meets the configured threshold.
    pub fn weak_topics(&self, stats: &[TopicStat]) -> HashSet<String> {
        stats
            .iter()
            .filter(|s| s.attempts >= self.config.weak_topic_min_attempts)
            .filter(|s| s.error_rate() >= self.config.weak_topic_error_rate)
            .map(|s| s.topic.clone())
            .collect()
    }

    /// Weak topics read from storage; empty when stats are unavailable.
    pub fn load_weak_topics<S: Storage + ?Sized>(&self, storage: &S, user: UserId, now: DateTime<Utc>) -> HashSet<String> {
        let since = now - Duration::days(i64::from(self.config.weak_topic_window_days));
        match storage.topic_stats(user, since) {
            Ok(stats) => self.weak_topics(&stats),
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Topic stats unavailable");
                HashSet::new()
            }
        }
    }

    pub fn is_stale(&self, score: &PriorityScore, now: DateTime<Utc>) -> bool {
        now - score.last_calculated_at > Duration::hours(self.config.max_score_age_hours)
    }

    /// Recompute and store the score for one pair; call after every recorded answer.
    pub fn on_answer_recorded<S: Storage + ?Sized>(
        &self,
        storage: &S,
        user: UserId,
        question: QuestionId,
        now: DateTime<Utc>,
    ) -> f64 {
        let prefs = match storage.learning_preferences(user) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Preferences unavailable, using neutral score");
                return NEUTRAL_SCORE;
            }
        };
        let weak = self.load_weak_topics(storage, user, now);
        self.recompute(storage, user, question, &prefs, &weak, now)
    }

    /// Recompute one score and write it back with `last_calculated_at = now`.
    pub fn recompute<S: Storage + ?Sized>(
        &self,
        storage: &S,
        user: UserId,
        question: QuestionId,
        prefs: &LearningPreferences,
        weak_topics: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f64 {
        let history = match storage.question_history(user, question) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    user_id = %user,
                    question_id = %question,
                    error = %e,
                    "History unavailable, using neutral score"
                );
                return NEUTRAL_SCORE;
            }
        };

        let score = self.score(prefs, &history, weak_topics, now);
        let record = PriorityScore {
            user,
            question,
            score,
            last_calculated_at: now,
        };
        if let Err(e) = storage.upsert_priority_score(&record) {
            tracing::warn!(user_id = %user, question_id = %question, error = %e, "Failed to store priority score");
        }
        score
    }

    /// Current scores for `questions`, recomputing missing or stale entries.
    pub fn scores_for<S: Storage + ?Sized>(
        &self,
        storage: &S,
        user: UserId,
        prefs: &LearningPreferences,
        questions: &[QuestionId],
        now: DateTime<Utc>,
    ) -> HashMap<QuestionId, f64> {
        let stored = storage.priority_scores(user, questions).unwrap_or_else(|e| {
            tracing::warn!(user_id = %user, error = %e, "Stored scores unavailable, recomputing");
            HashMap::new()
        });

        let mut weak: Option<HashSet<String>> = None;
        let mut scores = HashMap::with_capacity(questions.len());
        for &question in questions {
            let score = match stored.get(&question) {
                Some(s) if !self.is_stale(s, now) => s.score,
                _ => {
                    let weak = weak.get_or_insert_with(|| self.load_weak_topics(storage, user, now));
                    self.recompute(storage, user, question, prefs, weak, now)
                }
            };
            scores.insert(question, score);
        }
        scores
    }
}

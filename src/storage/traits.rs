//! Storage trait definitions.
//!
//! The scheduler owns no durable state. These traits name the access patterns it
//! needs: aggregate reads, an upsert per (user, question) for priority scores, an
//! atomic delete-then-insert per (user, date) for assignments and an
//! all-or-nothing batch insert for generated questions.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use crate::domain::{
    CandidateQuestion, DailyAssignment, GenerationChoice, GenerationHint, LearningPreferences, NewQuestion,
    PoolKey, PoolStats, PriorityScore, QuestionHistory, QuestionId, QuestionType, TopicStat, User, UserId,
};
use crate::error::Result;

/// Question, assignment, score and preference records.
pub trait Storage: Send + Sync {
    /// All users, ordered by id.
    fn list_users(&self) -> Result<Vec<User>>;

    fn get_user(&self, user: UserId) -> Result<Option<User>>;

    /// Stored preferences, or defaults when the user has none.
    fn learning_preferences(&self, user: UserId) -> Result<LearningPreferences>;

    /// Pool counts for one pool. Questions answered correctly at or after
    /// `correct_since` are not part of the pool.
    fn pool_stats(&self, pool: &PoolKey, correct_since: DateTime<Utc>) -> Result<PoolStats>;

    /// Every question assigned to the user for the pool's language and level.
    fn candidate_questions(&self, pool: &PoolKey) -> Result<Vec<CandidateQuestion>>;

    fn question_history(&self, user: UserId, question: QuestionId) -> Result<QuestionHistory>;

    /// Per-topic answer counts since `since`.
    fn topic_stats(&self, user: UserId, since: DateTime<Utc>) -> Result<Vec<TopicStat>>;

    /// Stored scores for the given questions; missing entries are absent from the map.
    fn priority_scores(&self, user: UserId, questions: &[QuestionId]) -> Result<HashMap<QuestionId, PriorityScore>>;

    /// Insert or replace the score for (user, question).
    fn upsert_priority_score(&self, score: &PriorityScore) -> Result<()>;

    fn assignments_for(&self, user: UserId, date: NaiveDate) -> Result<Vec<DailyAssignment>>;

    /// In one transaction: delete the incomplete rows for (user, date), then
    /// insert `questions`. Completed rows are kept.
    fn replace_assignments(&self, user: UserId, date: NaiveDate, questions: &[QuestionId]) -> Result<()>;

    /// Insert a validated batch and assign it to the pool's user. All or nothing.
    fn save_generated(&self, pool: &PoolKey, questions: &[NewQuestion], now: DateTime<Utc>) -> Result<Vec<QuestionId>>;
}

/// Generation-hint history collaborator.
pub trait HintStore: Send + Sync {
    /// Most recent choices first.
    fn recent_choices(&self, pool: &PoolKey, limit: usize) -> Result<Vec<GenerationChoice>>;

    fn record_choice(&self, choice: &GenerationChoice) -> Result<()>;

    /// Hints for the user that have not expired at `now`.
    fn active_hints(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<GenerationHint>>;

    fn upsert_hint(&self, hint: &GenerationHint) -> Result<()>;

    fn clear_hint(&self, pool: &PoolKey, question_type: QuestionType) -> Result<()>;
}

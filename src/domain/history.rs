//! Answer-history aggregates and stored priority scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestionId, UserId};

/// Aggregated answer history for one (user, question) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionHistory {
    pub question_id: QuestionId,
    pub topic: String,
    pub attempts: u32,
    pub correct: u32,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_correct_at: Option<DateTime<Utc>>,
}

impl QuestionHistory {
    /// History for a question the user has never answered.
    pub fn unseen(question_id: QuestionId, topic: impl Into<String>) -> Self {
        Self {
            question_id,
            topic: topic.into(),
            attempts: 0,
            correct: 0,
            last_seen_at: None,
            last_correct_at: None,
        }
    }

    pub fn is_unseen(&self) -> bool {
        self.attempts == 0
    }
}

/// Per-topic answer counts over a recent window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicStat {
    pub topic: String,
    pub attempts: u32,
    pub incorrect: u32,
}

impl TopicStat {
    pub fn error_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.incorrect) / f64::from(self.attempts)
        }
    }
}

/// A question in the user's pool considered for daily assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuestion {
    pub id: QuestionId,
    pub topic: String,
    pub last_correct_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub user: UserId,
    pub question: QuestionId,
    pub score: f64,
    pub last_calculated_at: DateTime<Utc>,
}

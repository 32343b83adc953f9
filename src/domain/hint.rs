//! Generation hint history.
//!
//! `GenerationChoice` records what variety constraints a past batch used so the
//! next batch can steer away from them. `GenerationHint` is a short-lived nudge
//! from the quiz flow that a user is waiting on a particular question type.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestionType, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationChoice {
    pub user: UserId,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub topic: Option<String>,
    pub grammar_focus: Option<String>,
    pub difficulty_modifier: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationHint {
    pub user: UserId,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub expires_at: DateTime<Utc>,
}

impl GenerationHint {
    pub fn expiring_in(
        user: UserId,
        language: impl Into<String>,
        level: impl Into<String>,
        question_type: QuestionType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            user,
            language: language.into(),
            level: level.into(),
            question_type,
            expires_at: now + ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn matches_pool(&self, language: &str, level: &str) -> bool {
        self.language == language && self.level == level
    }
}

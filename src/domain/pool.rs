//! Pool identity, derived pool statistics and transient generation requests.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{QuestionType, UserId};

/// One user's question pool for a language and level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub user: UserId,
    pub language: String,
    pub level: String,
}

impl PoolKey {
    pub fn new(user: UserId, language: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            user,
            language: language.into(),
            level: level.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.language, self.level)
    }
}

/// Counts derived from storage on every evaluation. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Assigned questions not answered correctly within the repeat-avoid window.
    pub pool_count: usize,
    /// Pooled questions the user has never answered.
    pub fresh_count: usize,
    pub by_type: HashMap<QuestionType, usize>,
}

impl PoolStats {
    /// Fresh share of the pool; an empty pool has ratio 0.
    pub fn fresh_ratio(&self) -> f64 {
        if self.pool_count == 0 {
            0.0
        } else {
            self.fresh_count as f64 / self.pool_count as f64
        }
    }

    /// The question type with the fewest pooled questions, first in enum order on ties.
    pub fn scarcest_type(&self) -> QuestionType {
        QuestionType::ALL
            .into_iter()
            .min_by_key(|t| self.by_type.get(t).copied().unwrap_or(0))
            .unwrap_or(QuestionType::Vocabulary)
    }
}

/// Which component asked for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    PoolMonitor,
    Planner,
    Manual,
}

/// A request to generate questions for one pool. Consumed by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub pool: PoolKey,
    pub question_type: QuestionType,
    pub topic: Option<String>,
    pub target_count: usize,
    pub origin: RequestOrigin,
    pub provider: String,
    /// Set when an active generation hint chose `question_type`.
    #[serde(default)]
    pub hinted: bool,
}

impl GenerationRequest {
    pub fn user(&self) -> UserId {
        self.pool.user
    }

    /// Fold another request for the same pool into this one, keeping the larger target.
    ///
    /// A hinted type wins over an unhinted one; otherwise the receiver's type stays.
    pub fn absorb(&mut self, other: GenerationRequest) {
        debug_assert_eq!(self.pool, other.pool);
        self.target_count = self.target_count.max(other.target_count);
        if other.hinted && !self.hinted {
            self.question_type = other.question_type;
            self.hinted = true;
        }
        if self.topic.is_none() {
            self.topic = other.topic;
        }
    }
}

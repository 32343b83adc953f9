//! Daily question assignments.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestionId, UserId};

/// At most one row exists per (user, question, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAssignment {
    pub user: UserId,
    pub question: QuestionId,
    pub date: NaiveDate,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

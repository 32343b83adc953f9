//! Domain types for quizpool
//!
//! - User, LearningPreferences: who is studying and how they want to be scheduled
//! - Question: stored practice content
//! - PoolKey, PoolStats, GenerationRequest: pool identity, derived counts, refill work
//! - QuestionHistory, PriorityScore: aggregates consumed by the priority scorer
//! - DailyAssignment: per-day question rows
//! - GenerationChoice, GenerationHint: generation-hint history

pub mod assignment;
pub mod hint;
pub mod history;
pub mod pool;
pub mod question;
pub mod user;

pub use assignment::DailyAssignment;
pub use hint::{GenerationChoice, GenerationHint};
pub use history::{CandidateQuestion, PriorityScore, QuestionHistory, TopicStat};
pub use pool::{GenerationRequest, PoolKey, PoolStats, RequestOrigin};
pub use question::{Difficulty, NewQuestion, Question, QuestionId, QuestionType};
pub use user::{DEFAULT_DAILY_GOAL, LearningPreferences, User, UserId};

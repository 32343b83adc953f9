//! Quizpool - adaptive question-pool maintenance
//!
//! A background worker that keeps every active learner supplied with practice
//! questions: it scores questions per user, refills thin pools through a
//! rate-limited generator, and pre-assigns questions to calendar days.

pub mod config;
pub mod domain;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

pub use config::Config;
pub use error::{QuizpoolError, Result};

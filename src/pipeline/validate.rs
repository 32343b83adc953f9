//! Checks provider output before anything is stored.

use std::collections::HashSet;

use thiserror::Error;

use crate::domain::{Difficulty, NewQuestion, PoolKey, QuestionType};
use crate::generator::{GeneratedQuestion, VarietyConstraints};

/// Topic stored when none is returned and no topic list is configured.
pub const FALLBACK_TOPIC: &str = "general";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("question text is empty")]
    EmptyText,

    #[error("expected {expected} options, got {actual}")]
    OptionCount { expected: usize, actual: usize },

    #[error("option {0} is empty")]
    EmptyOption(usize),

    #[error("correct index {index} out of range for {options} options")]
    CorrectIndex { index: i64, options: usize },

    #[error("unknown difficulty: {0}")]
    Difficulty(String),

    #[error("topic not allowed: {0}")]
    Topic(String),

    #[error("question has no topic")]
    MissingTopic,

    #[error("expected question type {expected}, got {actual}")]
    QuestionType { expected: QuestionType, actual: String },
}

#[derive(Debug, Clone)]
pub struct QuestionValidator {
    option_count: usize,
    allowed_topics: HashSet<String>,
}

impl QuestionValidator {
    /// An empty topic list allows any topic.
    pub fn new(option_count: usize, topics: &[String]) -> Self {
        Self {
            option_count,
            allowed_topics: topics.iter().cloned().collect(),
        }
    }

    /// Validate one raw question and convert it for storage.
    pub fn validate(
        &self,
        raw: &GeneratedQuestion,
        pool: &PoolKey,
        question_type: QuestionType,
        constraints: &VarietyConstraints,
    ) -> Result<NewQuestion, ValidationError> {
        let text = raw.text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }

        if raw.options.len() != self.option_count {
            return Err(ValidationError::OptionCount {
                expected: self.option_count,
                actual: raw.options.len(),
            });
        }
        if let Some(i) = raw.options.iter().position(|o| o.trim().is_empty()) {
            return Err(ValidationError::EmptyOption(i));
        }

        let correct_index = usize::try_from(raw.correct_index)
            .ok()
            .filter(|i| *i < raw.options.len())
            .ok_or(ValidationError::CorrectIndex {
                index: raw.correct_index,
                options: raw.options.len(),
            })?;

        let difficulty: Difficulty = raw
            .difficulty
            .parse()
            .map_err(|_| ValidationError::Difficulty(raw.difficulty.clone()))?;

        if let Some(declared) = &raw.question_type {
            let matches = declared.parse::<QuestionType>().is_ok_and(|t| t == question_type);
            if !matches {
                return Err(ValidationError::QuestionType {
                    expected: question_type,
                    actual: declared.clone(),
                });
            }
        }

        let topic = self.topic_for(raw, constraints)?;

        Ok(NewQuestion {
            language: pool.language.clone(),
            level: pool.level.clone(),
            question_type,
            topic,
            grammar_focus: raw.grammar_focus.clone().or_else(|| constraints.grammar_focus.clone()),
            difficulty,
            text: text.to_string(),
            options: raw.options.iter().map(|o| o.trim().to_string()).collect(),
            correct_index,
        })
    }

    fn topic_for(&self, raw: &GeneratedQuestion, constraints: &VarietyConstraints) -> Result<String, ValidationError> {
        let topic = raw
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or(constraints.topic.as_deref());

        match topic {
            // The batch's own constraint topic is always accepted.
            Some(t) if self.allowed_topics.is_empty() || self.allowed_topics.contains(t) => Ok(t.to_string()),
            Some(t) if constraints.topic.as_deref() == Some(t) => Ok(t.to_string()),
            Some(t) => Err(ValidationError::Topic(t.to_string())),
            None if self.allowed_topics.is_empty() => Ok(FALLBACK_TOPIC.to_string()),
            None => Err(ValidationError::MissingTopic),
        }
    }
}

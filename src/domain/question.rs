//! Stored questions and their enumerations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuizpoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId(pub i64);

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Vocabulary,
    FillInBlank,
    QuestionAnswer,
    ReadingComprehension,
}

impl QuestionType {
    pub const ALL: [QuestionType; 4] = [
        QuestionType::Vocabulary,
        QuestionType::FillInBlank,
        QuestionType::QuestionAnswer,
        QuestionType::ReadingComprehension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Vocabulary => "vocabulary",
            QuestionType::FillInBlank => "fill_in_blank",
            QuestionType::QuestionAnswer => "question_answer",
            QuestionType::ReadingComprehension => "reading_comprehension",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = QuizpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| QuizpoolError::ValidationFailed(format!("unknown question type: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = QuizpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(QuizpoolError::ValidationFailed(format!("unknown difficulty: {}", other))),
        }
    }
}

/// A validated question that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub topic: String,
    pub grammar_focus: Option<String>,
    pub difficulty: Difficulty,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub topic: String,
    pub grammar_focus: Option<String>,
    pub difficulty: Difficulty,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub created_at: DateTime<Utc>,
}

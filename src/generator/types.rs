//! Prompt and response types exchanged with generators.

use serde::{Deserialize, Serialize};

use crate::domain::QuestionType;

/// Variety dimensions chosen for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarietyConstraints {
    pub topic: Option<String>,
    pub grammar_focus: Option<String>,
    pub difficulty_modifier: Option<String>,
}

/// Everything a provider needs for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPrompt {
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub count: usize,
    pub option_count: usize,
    pub constraints: VarietyConstraints,
    /// Topics the user has recently struggled with.
    pub weak_topics: Vec<String>,
}

impl GenerationPrompt {
    /// Render the user-facing instruction text sent to chat-style providers.
    pub fn render(&self) -> String {
        let mut text = format!(
            "Generate {} {} questions for a {} learner at level {}.\n\
             Each question must have exactly {} answer options and one correct answer.",
            self.count,
            self.question_type.as_str().replace('_', " "),
            self.language,
            self.level,
            self.option_count,
        );
        if let Some(topic) = &self.constraints.topic {
            text.push_str(&format!("\nTopic: {}.", topic));
        }
        if let Some(grammar) = &self.constraints.grammar_focus {
            text.push_str(&format!("\nGrammar focus: {}.", grammar));
        }
        if let Some(modifier) = &self.constraints.difficulty_modifier {
            text.push_str(&format!("\nStyle: {}.", modifier));
        }
        if !self.weak_topics.is_empty() {
            text.push_str(&format!("\nThe learner struggles with: {}.", self.weak_topics.join(", ")));
        }
        text.push_str(
            "\nRespond with JSON: {\"questions\": [{\"text\": string, \"options\": [string], \
             \"correct_index\": integer, \"difficulty\": \"easy\"|\"medium\"|\"hard\", \
             \"topic\": string, \"grammar_focus\": string|null, \"question_type\": string}]}",
        );
        text
    }
}

/// Unvalidated question content as returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_index: i64,
    pub difficulty: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub grammar_focus: Option<String>,
    #[serde(default)]
    pub question_type: Option<String>,
}

/// Wire envelope for provider responses.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuestions {
    pub questions: Vec<GeneratedQuestion>,
}

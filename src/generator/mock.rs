//! Scripted generator for tests and local runs.
//!
//! Responses are served from a queue in order. Once the queue is empty every
//! call returns well-formed questions built from the prompt.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationPrompt, GeneratedQuestion, GeneratorError, QuestionGenerator};
use crate::domain::{Difficulty, NewQuestion, QuestionType};

pub type MockResponse = Result<Vec<GeneratedQuestion>, GeneratorError>;

#[derive(Debug, Default)]
pub struct MockGenerator {
    script: Mutex<VecDeque<MockResponse>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<GenerationPrompt>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: MockResponse) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<GenerationPrompt> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl QuestionGenerator for MockGenerator {
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<GeneratedQuestion>, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        scripted.unwrap_or_else(|| Ok(questions_for(prompt)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Well-formed raw questions matching a prompt.
pub fn questions_for(prompt: &GenerationPrompt) -> Vec<GeneratedQuestion> {
    (0..prompt.count)
        .map(|i| GeneratedQuestion {
            text: format!("{} {} question {}", prompt.language, prompt.level, i + 1),
            options: (0..prompt.option_count).map(|o| format!("option {}", o + 1)).collect(),
            correct_index: 0,
            difficulty: "medium".to_string(),
            topic: prompt.constraints.topic.clone(),
            grammar_focus: prompt.constraints.grammar_focus.clone(),
            question_type: Some(prompt.question_type.as_str().to_string()),
        })
        .collect()
}

/// A valid stored-question payload for seeding.
pub fn sample_question(language: &str, level: &str, question_type: QuestionType, topic: &str, n: usize) -> NewQuestion {
    NewQuestion {
        language: language.to_string(),
        level: level.to_string(),
        question_type,
        topic: topic.to_string(),
        grammar_focus: None,
        difficulty: Difficulty::Medium,
        text: format!("Sample {} question {}", topic, n),
        options: vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
        correct_index: n % 4,
    }
}

//! Generator trait definition

use async_trait::async_trait;

use super::{GenerationPrompt, GeneratedQuestion, GeneratorError};

/// Stateless question generator - each call is independent
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Produce up to `prompt.count` questions. Content is unvalidated.
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<GeneratedQuestion>, GeneratorError>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

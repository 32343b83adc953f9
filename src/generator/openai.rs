//! OpenAI-compatible chat completions generator
//!
//! Works against any endpoint exposing `POST {base_url}/chat/completions`,
//! including local servers such as Ollama. The model is asked for a JSON object
//! whose `questions` array is returned unvalidated.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use super::{GeneratedQuestion, GeneratedQuestions, GenerationPrompt, GeneratorError, QuestionGenerator};
use crate::config::ProviderConfig;

/// Fallback wait when a 429 carries no usable retry-after header
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You write multiple-choice language-learning questions. \
Always answer with a single JSON object and nothing else.";

/// Connection settings for one provider
#[derive(Debug, Clone)]
pub struct HttpGeneratorConfig {
    pub code: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl HttpGeneratorConfig {
    /// Build from a provider entry, reading the API key from its environment variable.
    pub fn from_provider(provider: &ProviderConfig) -> Result<Self, GeneratorError> {
        let base_url = provider
            .base_url
            .clone()
            .ok_or_else(|| GeneratorError::InvalidConfig(format!("provider {} has no base_url", provider.code)))?;

        let api_key = match &provider.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                GeneratorError::InvalidConfig(format!("{} not set for provider {}", var, provider.code))
            })?),
            None => None,
        };

        Ok(Self {
            code: provider.code.clone(),
            base_url,
            model: provider.model.clone(),
            api_key,
            timeout: Duration::from_secs(provider.timeout_secs),
        })
    }
}

pub struct HttpGenerator {
    client: Client,
    config: HttpGeneratorConfig,
}

impl HttpGenerator {
    pub fn new(config: HttpGeneratorConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeneratorError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, prompt: &GenerationPrompt) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt.render()}
            ],
            "response_format": {"type": "json_object"}
        })
    }

    async fn send_request(&self, body: Value) -> Result<Value, GeneratorError> {
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
            return Err(GeneratorError::RateLimited {
                retry_after: Some(retry_after),
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Auth(format!("{}: {}", status, body)));
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extract the question array from a chat completion body.
fn parse_response(body: &Value) -> Result<Vec<GeneratedQuestion>, GeneratorError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| GeneratorError::MalformedResponse("missing choices[0].message.content".to_string()))?;

    let parsed: GeneratedQuestions = serde_json::from_str(strip_code_fence(content))?;
    Ok(parsed.questions)
}

/// Some models wrap JSON in a markdown fence despite instructions.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl QuestionGenerator for HttpGenerator {
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<GeneratedQuestion>, GeneratorError> {
        let body = self.build_request(prompt);
        let response = self.send_request(body).await?;
        parse_response(&response)
    }

    fn name(&self) -> &str {
        &self.config.code
    }
}

impl std::fmt::Debug for HttpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerator")
            .field("code", &self.config.code)
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuestionType;
    use crate::generator::VarietyConstraints;

    fn config() -> HttpGeneratorConfig {
        HttpGeneratorConfig {
            code: "local".to_string(),
            base_url: "http://localhost:11434/v1/".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let generator = HttpGenerator::new(config()).unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_build_request_uses_model_and_prompt() {
        let generator = HttpGenerator::new(config()).unwrap();
        let prompt = GenerationPrompt {
            language: "italian".to_string(),
            level: "A2".to_string(),
            question_type: QuestionType::Vocabulary,
            count: 2,
            option_count: 4,
            constraints: VarietyConstraints::default(),
            weak_topics: Vec::new(),
        };
        let body = generator.build_request(&prompt);
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"].as_str().unwrap().contains("italian"));
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "choices": [{"message": {"content": "{\"questions\": [{\"text\": \"Q\", \"options\": [\"a\",\"b\",\"c\",\"d\"], \"correct_index\": 2, \"difficulty\": \"hard\"}]}"}}]
        });
        let questions = parse_response(&body).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_index, 2);
    }

    #[test]
    fn test_parse_response_strips_code_fence() {
        let body = json!({
            "choices": [{"message": {"content": "```json\n{\"questions\": []}\n```"}}]
        });
        assert!(parse_response(&body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_response_missing_content_is_malformed() {
        let body = json!({"choices": []});
        assert!(matches!(parse_response(&body), Err(GeneratorError::MalformedResponse(_))));

        let body = json!({"choices": [{"message": {"content": "not json"}}]});
        assert!(matches!(parse_response(&body), Err(GeneratorError::MalformedResponse(_))));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_from_provider_requires_base_url() {
        let provider = ProviderConfig {
            code: "broken".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpGeneratorConfig::from_provider(&provider),
            Err(GeneratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_provider_missing_key_env() {
        let provider = ProviderConfig {
            code: "keyed".to_string(),
            base_url: Some("http://localhost".to_string()),
            api_key_env: Some("QUIZPOOL_TEST_KEY_THAT_IS_NOT_SET".to_string()),
            ..Default::default()
        };
        let err = HttpGeneratorConfig::from_provider(&provider).unwrap_err();
        assert!(err.to_string().contains("QUIZPOOL_TEST_KEY_THAT_IS_NOT_SET"));
    }
}

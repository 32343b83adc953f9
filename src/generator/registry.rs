//! Provider lookup by identifier.
//!
//! Each provider code maps to a capability descriptor (batch size, grammar
//! support) and the generator that serves it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::openai::{HttpGenerator, HttpGeneratorConfig};
use super::{GeneratedQuestion, GenerationPrompt, GeneratorError, QuestionGenerator};
use crate::config::ProviderConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub code: String,
    /// Most questions requested in a single call.
    pub batch_size: usize,
    pub supports_grammar: bool,
}

impl From<&ProviderConfig> for ProviderCapabilities {
    fn from(provider: &ProviderConfig) -> Self {
        Self {
            code: provider.code.clone(),
            batch_size: provider.batch_size.max(1),
            supports_grammar: provider.supports_grammar,
        }
    }
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn QuestionGenerator>>,
    capabilities: HashMap<String, ProviderCapabilities>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP generators for every configured provider.
    ///
    /// A provider that cannot be constructed stays registered and fails each
    /// call with its configuration error.
    pub fn from_config(providers: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            let caps = ProviderCapabilities::from(provider);
            match HttpGeneratorConfig::from_provider(provider).and_then(HttpGenerator::new) {
                Ok(generator) => registry.register(caps, Arc::new(generator)),
                Err(e) => {
                    tracing::warn!(provider = %provider.code, error = %e, "Provider unavailable");
                    registry.register(caps, Arc::new(Unavailable(e)));
                }
            }
        }
        registry
    }

    pub fn register(&mut self, capabilities: ProviderCapabilities, generator: Arc<dyn QuestionGenerator>) {
        self.generators.insert(capabilities.code.clone(), generator);
        self.capabilities.insert(capabilities.code.clone(), capabilities);
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn QuestionGenerator>, GeneratorError> {
        self.generators
            .get(code)
            .cloned()
            .ok_or_else(|| GeneratorError::UnknownProvider(code.to_string()))
    }

    pub fn capabilities(&self, code: &str) -> Option<&ProviderCapabilities> {
        self.capabilities.get(code)
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

struct Unavailable(GeneratorError);

#[async_trait]
impl QuestionGenerator for Unavailable {
    async fn generate(&self, _prompt: &GenerationPrompt) -> Result<Vec<GeneratedQuestion>, GeneratorError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

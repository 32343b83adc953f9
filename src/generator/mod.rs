//! Question generation providers
//!
//! The generator call is opaque to the scheduler: it takes a structured prompt
//! and returns unvalidated question content, possibly slowly, possibly failing.
//! `GeneratorError::is_transient` drives retry classification.

mod client;
mod error;
pub mod mock;
pub mod openai;
mod registry;
mod types;

pub use client::QuestionGenerator;
pub use error::GeneratorError;
pub use mock::MockGenerator;
pub use openai::HttpGenerator;
pub use registry::{GeneratorRegistry, ProviderCapabilities};
pub use types::{GeneratedQuestion, GeneratedQuestions, GenerationPrompt, VarietyConstraints};

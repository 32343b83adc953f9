//! Generation pipeline.
//!
//! One run turns a `GenerationRequest` into persisted, assigned questions:
//! pick variety constraints, call the provider in batches with retry, validate
//! everything, then write the whole batch in one transaction. Nothing is stored
//! unless every question passes. The gate slot is released on every exit path.

mod run;
mod validate;
mod variety;

pub use run::{FailureKind, FailureReason, GeneratedBatch, GenerationRun, RunFailure, RunState};
pub use validate::{FALLBACK_TOPIC, QuestionValidator, ValidationError};
pub use variety::VarietySelector;

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::domain::{GenerationChoice, GenerationRequest};
use crate::generator::{GeneratedQuestion, GenerationPrompt, GeneratorRegistry, QuestionGenerator};
use crate::scheduler::gate::{ConcurrencyGate, Slot};
use crate::scheduler::priority::PriorityScorer;
use crate::scheduler::retry::{ErrorClass, RetryPolicy};
use crate::storage::{HintStore, Storage};

type Step<T> = std::result::Result<T, (FailureKind, String)>;

pub struct GenerationPipeline<S> {
    storage: Arc<S>,
    registry: Arc<GeneratorRegistry>,
    gate: ConcurrencyGate,
    retry: RetryPolicy,
    scorer: PriorityScorer,
    variety: VarietySelector,
    validator: QuestionValidator,
    option_count: usize,
    recent_choice_limit: usize,
}

impl<S> Clone for GenerationPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            registry: self.registry.clone(),
            gate: self.gate.clone(),
            retry: self.retry.clone(),
            scorer: self.scorer.clone(),
            variety: self.variety.clone(),
            validator: self.validator.clone(),
            option_count: self.option_count,
            recent_choice_limit: self.recent_choice_limit,
        }
    }
}

impl<S: Storage + HintStore + 'static> GenerationPipeline<S> {
    pub fn new(config: &Config, storage: Arc<S>, registry: Arc<GeneratorRegistry>, gate: ConcurrencyGate) -> Self {
        Self {
            storage,
            registry,
            gate,
            retry: RetryPolicy::from_config(&config.retry),
            scorer: PriorityScorer::new(config.priority.clone()),
            variety: VarietySelector::new(config.variety.clone()),
            validator: QuestionValidator::new(config.generation.option_count, &config.variety.topics),
            option_count: config.generation.option_count,
            recent_choice_limit: config.generation.recent_choice_limit,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Acquire a pool-scoped slot, then run. Rejection fails immediately.
    pub async fn run(&self, request: GenerationRequest) -> Result<GeneratedBatch, RunFailure> {
        match self.gate.try_acquire(request.user(), Some(request.pool.clone())) {
            Ok(slot) => self.run_with_slot(request, slot).await,
            Err(rejected) => {
                tracing::debug!(pool = %request.pool, reason = %rejected, "Generation rejected by gate");
                Err(RunFailure {
                    pool: request.pool,
                    question_type: request.question_type,
                    kind: FailureKind::Rejected,
                    message: rejected.to_string(),
                    attempts: 0,
                })
            }
        }
    }

    /// Run with a slot the caller already holds. The slot is released before returning.
    pub async fn run_with_slot(&self, request: GenerationRequest, mut slot: Slot) -> Result<GeneratedBatch, RunFailure> {
        let mut run = GenerationRun::new(request.pool.clone());
        let mut attempts = 0u32;

        let result = self.execute(&mut run, &request, &mut attempts).await;
        slot.release();

        match result {
            Ok(batch) => {
                tracing::info!(
                    pool = %request.pool,
                    question_type = %request.question_type,
                    count = batch.question_ids.len(),
                    attempts = attempts,
                    "Generated questions"
                );
                Ok(batch)
            }
            Err((kind, message)) => {
                run.fail(kind, message.clone());
                tracing::warn!(
                    pool = %request.pool,
                    question_type = %request.question_type,
                    kind = %kind,
                    attempts = attempts,
                    error = %message,
                    "Generation failed"
                );
                Err(RunFailure {
                    pool: request.pool,
                    question_type: request.question_type,
                    kind,
                    message,
                    attempts,
                })
            }
        }
    }

    async fn execute(&self, run: &mut GenerationRun, request: &GenerationRequest, attempts: &mut u32) -> Step<GeneratedBatch> {
        advance(run, RunState::Acquiring)?;

        let caps = self
            .registry
            .capabilities(&request.provider)
            .cloned()
            .ok_or_else(|| (FailureKind::Permanent, format!("unknown provider: {}", request.provider)))?;
        let generator = self
            .registry
            .get(&request.provider)
            .map_err(|e| (FailureKind::Permanent, e.to_string()))?;

        let pool = &request.pool;
        let now = Utc::now();
        let mut weak: Vec<String> = self
            .scorer
            .load_weak_topics(self.storage.as_ref(), pool.user, now)
            .into_iter()
            .collect();
        weak.sort();
        let recent = self
            .storage
            .recent_choices(pool, self.recent_choice_limit)
            .unwrap_or_else(|e| {
                tracing::warn!(pool = %pool, error = %e, "Recent choices unavailable");
                Vec::new()
            });
        let constraints = {
            let mut rng = rand::thread_rng();
            self.variety.select(
                &mut rng,
                &pool.level,
                caps.supports_grammar,
                request.topic.as_deref(),
                &weak,
                &recent,
            )
        };

        advance(run, RunState::Calling)?;
        let mut raw = Vec::with_capacity(request.target_count);
        let mut remaining = request.target_count.max(1);
        let mut calls = 0u32;
        while remaining > 0 {
            let count = remaining.min(caps.batch_size);
            let prompt = GenerationPrompt {
                language: pool.language.clone(),
                level: pool.level.clone(),
                question_type: request.question_type,
                count,
                option_count: self.option_count,
                constraints: constraints.clone(),
                weak_topics: weak.clone(),
            };
            let questions = self.call_with_retry(generator.as_ref(), &prompt, attempts).await?;
            if questions.is_empty() {
                return Err((FailureKind::Validation, "provider returned no questions".to_string()));
            }
            raw.extend(questions.into_iter().take(count));
            remaining -= count;
            calls += 1;
        }

        advance(run, RunState::Validating)?;
        let validated = raw
            .iter()
            .enumerate()
            .map(|(i, q)| {
                self.validator
                    .validate(q, pool, request.question_type, &constraints)
                    .map_err(|e| (FailureKind::Validation, format!("question {}: {}", i + 1, e)))
            })
            .collect::<Step<Vec<_>>>()?;

        advance(run, RunState::Persisting)?;
        let question_ids = self
            .storage
            .save_generated(pool, &validated, Utc::now())
            .map_err(|e| (FailureKind::Storage, e.to_string()))?;

        // The batch is committed; bookkeeping failures below only warn.
        let choice = GenerationChoice {
            user: pool.user,
            language: pool.language.clone(),
            level: pool.level.clone(),
            question_type: request.question_type,
            topic: constraints.topic.clone(),
            grammar_focus: constraints.grammar_focus.clone(),
            difficulty_modifier: constraints.difficulty_modifier.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.storage.record_choice(&choice) {
            tracing::warn!(pool = %pool, error = %e, "Failed to record generation choice");
        }
        if let Err(e) = self.storage.clear_hint(pool, request.question_type) {
            tracing::warn!(pool = %pool, error = %e, "Failed to clear generation hint");
        }

        advance(run, RunState::Completed)?;
        Ok(GeneratedBatch {
            pool: pool.clone(),
            question_type: request.question_type,
            question_ids,
            attempts: *attempts,
            calls,
        })
    }

    async fn call_with_retry(
        &self,
        generator: &dyn QuestionGenerator,
        prompt: &GenerationPrompt,
        attempts: &mut u32,
    ) -> Step<Vec<GeneratedQuestion>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            *attempts += 1;
            match generator.generate(prompt).await {
                Ok(questions) => return Ok(questions),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    let delay = self.retry.delay_for(&e, attempt);
                    tracing::warn!(
                        provider = generator.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let kind = match self.retry.classify(&e) {
                        ErrorClass::Transient => FailureKind::TransientExhausted,
                        ErrorClass::Permanent => FailureKind::Permanent,
                    };
                    return Err((kind, e.to_string()));
                }
            }
        }
    }
}

fn advance(run: &mut GenerationRun, next: RunState) -> Step<()> {
    run.advance(next).map_err(|e| (FailureKind::Permanent, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use crate::domain::{GenerationHint, PoolKey, QuestionType, RequestOrigin, UserId};
    use crate::generator::{GeneratorError, MockGenerator, ProviderCapabilities};
    use crate::storage::SqliteStorage;

    struct Harness {
        storage: Arc<SqliteStorage>,
        mock: Arc<MockGenerator>,
        pipeline: GenerationPipeline<SqliteStorage>,
        user: UserId,
    }

    fn harness(mock: MockGenerator, batch_size: usize) -> Harness {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let user = storage.insert_user("alice", "italian", "A2", Some("mock")).unwrap();
        let mock = Arc::new(mock);

        let mut registry = GeneratorRegistry::new();
        registry.register(
            ProviderCapabilities {
                code: "mock".to_string(),
                batch_size,
                supports_grammar: true,
            },
            mock.clone(),
        );

        let config = Config::default();
        let pipeline = GenerationPipeline::new(&config, storage.clone(), Arc::new(registry), ConcurrencyGate::new(10, 1))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)));
        Harness {
            storage,
            mock,
            pipeline,
            user,
        }
    }

    fn request(user: UserId, target: usize) -> GenerationRequest {
        GenerationRequest {
            pool: PoolKey::new(user, "italian", "A2"),
            question_type: QuestionType::Vocabulary,
            topic: None,
            target_count: target,
            origin: RequestOrigin::PoolMonitor,
            provider: "mock".to_string(),
            hinted: false,
        }
    }

    fn pool_size(h: &Harness) -> usize {
        h.storage.candidate_questions(&PoolKey::new(h.user, "italian", "A2")).unwrap().len()
    }

    #[tokio::test]
    async fn test_run_splits_into_batches_and_persists() {
        let h = harness(MockGenerator::new(), 2);
        let batch = h.pipeline.run(request(h.user, 5)).await.unwrap();

        assert_eq!(batch.question_ids.len(), 5);
        assert_eq!(batch.calls, 3);
        assert_eq!(h.mock.calls(), 3);
        let counts: Vec<usize> = h.mock.prompts().iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(pool_size(&h), 5);
        assert_eq!(h.pipeline.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mock = MockGenerator::with_script(vec![Err(GeneratorError::Timeout), Err(GeneratorError::Network("reset".into()))]);
        let h = harness(mock, 5);
        let batch = h.pipeline.run(request(h.user, 3)).await.unwrap();
        assert_eq!(batch.attempts, 3);
        assert_eq!(batch.question_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_persists_nothing() {
        let mock = MockGenerator::with_script(vec![
            Err(GeneratorError::Timeout),
            Err(GeneratorError::Timeout),
            Err(GeneratorError::Timeout),
        ]);
        let h = harness(mock, 5);
        let failure = h.pipeline.run(request(h.user, 3)).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::TransientExhausted);
        assert_eq!(failure.attempts, 3);
        assert_eq!(pool_size(&h), 0);
        assert_eq!(h.pipeline.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mock = MockGenerator::with_script(vec![Err(GeneratorError::Auth("bad key".into()))]);
        let h = harness(mock, 5);
        let failure = h.pipeline.run(request(h.user, 3)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(h.mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_one_invalid_question_fails_whole_batch() {
        let h = harness(MockGenerator::new(), 2);
        let mut bad = crate::generator::mock::questions_for(&food_prompt(1));
        bad[0].correct_index = 9;
        // First call is fine, second returns an invalid question.
        h.mock.push(Ok(crate::generator::mock::questions_for(&food_prompt(2))));
        h.mock.push(Ok(bad));

        let failure = h.pipeline.run(request(h.user, 3)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(pool_size(&h), 0);
    }

    fn food_prompt(count: usize) -> GenerationPrompt {
        GenerationPrompt {
            language: "italian".to_string(),
            level: "A2".to_string(),
            question_type: QuestionType::Vocabulary,
            count,
            option_count: 4,
            constraints: crate::generator::VarietyConstraints {
                topic: Some("food".to_string()),
                ..Default::default()
            },
            weak_topics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_is_permanent() {
        let h = harness(MockGenerator::new(), 2);
        let mut req = request(h.user, 1);
        req.provider = "nope".to_string();
        let failure = h.pipeline.run(req).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(h.mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_when_user_slot_taken() {
        let h = harness(MockGenerator::new(), 2);
        let _held = h.pipeline.gate().try_acquire(h.user, None).unwrap();
        let failure = h.pipeline.run(request(h.user, 1)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Rejected);
        assert_eq!(h.mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_records_choice_and_clears_hint() {
        let h = harness(MockGenerator::new(), 5);
        let now = Utc::now();
        h.storage
            .upsert_hint(&GenerationHint::expiring_in(
                h.user,
                "italian",
                "A2",
                QuestionType::Vocabulary,
                now,
                ChronoDuration::minutes(10),
            ))
            .unwrap();

        h.pipeline.run(request(h.user, 2)).await.unwrap();

        assert!(h.storage.active_hints(h.user, Utc::now()).unwrap().is_empty());
        let choices = h.storage.recent_choices(&PoolKey::new(h.user, "italian", "A2"), 10).unwrap();
        assert_eq!(choices.len(), 1);
        assert!(choices[0].topic.is_some());
    }

    #[tokio::test]
    async fn test_aborted_run_releases_slot() {
        let h = harness(MockGenerator::new().with_delay(Duration::from_secs(30)), 5);
        let pipeline = h.pipeline.clone();
        let slot = pipeline.gate().try_acquire(h.user, Some(PoolKey::new(h.user, "italian", "A2"))).unwrap();
        let req = request(h.user, 1);

        let task = tokio::spawn(async move { pipeline.run_with_slot(req, slot).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.pipeline.gate().in_flight(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(h.pipeline.gate().in_flight(), 0);
        assert_eq!(pool_size(&h), 0);
    }
}

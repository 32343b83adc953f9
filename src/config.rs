//! Configuration loading and validation.
//!
//! Every section is `#[serde(default)]` so a partial YAML file only overrides
//! what it names. `Config::validate` is the single place thresholds are checked;
//! an invalid config is fatal to startup and never to an individual run.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuizpoolError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
    pub daily: DailyConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub priority: PriorityConfig,
    pub generation: GenerationConfig,
    pub providers: Vec<ProviderConfig>,
    pub variety: VarietyConfig,
    pub storage: StorageConfig,
}

/// Scheduler loop cadence, lifecycle and admin bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scan_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub start_paused: bool,
    /// Users seen within this many days count as active.
    pub active_window_days: u32,
    pub max_history: usize,
    pub max_failure_records: usize,
    pub user_backoff_max_secs: u64,
    pub channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            shutdown_timeout_secs: 30,
            start_paused: false,
            active_window_days: 14,
            max_history: 100,
            max_failure_records: 500,
            user_backoff_max_secs: 3600,
            channel_capacity: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Refill thresholds evaluated by the pool monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub question_refill_threshold: usize,
    pub daily_fresh_question_ratio: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            question_refill_threshold: 5,
            daily_fresh_question_ratio: 0.35,
        }
    }
}

/// Which constraint wins when avoiding recent repeats would leave a day short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Never reuse a recently-correct question; under-fill and request generation.
    StrictAvoid,
    /// Reuse recently-correct questions, best-scored first, to reach the goal.
    PreferGoal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    pub daily_horizon_days: u32,
    pub daily_repeat_avoid_days: u32,
    pub repeat_policy: RepeatPolicy,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            daily_horizon_days: 1,
            daily_repeat_avoid_days: 7,
            repeat_policy: RepeatPolicy::PreferGoal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_global: usize,
    pub max_per_user: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_global: 10,
            max_per_user: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Scores older than this are recomputed before use.
    pub max_score_age_hours: i64,
    pub weak_topic_window_days: u32,
    pub weak_topic_min_attempts: u32,
    /// Incorrect-rate at or above which a topic counts as weak.
    pub weak_topic_error_rate: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            max_score_age_hours: 24,
            weak_topic_window_days: 30,
            weak_topic_min_attempts: 3,
            weak_topic_error_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Provider used for users without one of their own.
    pub default_provider: String,
    pub option_count: usize,
    /// How many past generation choices to avoid repeating.
    pub recent_choice_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            option_count: 4,
            recent_choice_limit: 10,
        }
    }
}

/// Capability descriptor and connection settings for one generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub code: String,
    pub base_url: Option<String>,
    pub model: String,
    /// Environment variable holding the API key, if the provider needs one.
    pub api_key_env: Option<String>,
    pub batch_size: usize,
    pub supports_grammar: bool,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            code: String::new(),
            base_url: None,
            model: String::new(),
            api_key_env: None,
            batch_size: 5,
            supports_grammar: true,
            timeout_secs: 120,
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            code: "openai".to_string(),
            base_url: Some("https://api.openai.com/v1".to_string()),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            batch_size: 5,
            supports_grammar: true,
            timeout_secs: 120,
        },
        ProviderConfig {
            code: "ollama".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            model: "llama3".to_string(),
            api_key_env: None,
            batch_size: 1,
            supports_grammar: false,
            timeout_secs: 300,
        },
    ]
}

/// Dimensions the generation pipeline varies between batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VarietyConfig {
    pub topics: Vec<String>,
    pub grammar_focus: Vec<String>,
    /// Level-specific grammar focus; falls back to `grammar_focus`.
    pub grammar_focus_by_level: HashMap<String, Vec<String>>,
    pub difficulty_modifiers: Vec<String>,
}

impl Default for VarietyConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut by_level = HashMap::new();
        by_level.insert("A1".to_string(), strings(&["present tense", "articles", "basic pronouns"]));
        by_level.insert("A2".to_string(), strings(&["past tense", "prepositions", "reflexive verbs"]));
        by_level.insert("B1".to_string(), strings(&["subjunctive", "conditionals", "relative clauses"]));

        Self {
            topics: strings(&[
                "travel",
                "food",
                "work",
                "family",
                "health",
                "shopping",
                "weather",
                "hobbies",
            ]),
            grammar_focus: strings(&["verb conjugation", "word order", "agreement"]),
            grammar_focus_by_level: by_level,
            difficulty_modifiers: strings(&["straightforward", "slightly challenging", "tricky distractors"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quizpool")
                .join("quizpool.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
            daily: DailyConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            priority: PriorityConfig::default(),
            generation: GenerationConfig::default(),
            providers: default_providers(),
            variety: VarietyConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config = Self::from_yaml(&content)?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Capability descriptor for a provider code.
    pub fn provider(&self, code: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.code == code)
    }

    /// Check every threshold the scheduler relies on.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(QuizpoolError::Config(msg));

        if self.scheduler.scan_interval_secs == 0 {
            return fail("scheduler.scan_interval_secs must be greater than 0".to_string());
        }
        if self.pool.question_refill_threshold == 0 {
            return fail("pool.question_refill_threshold must be greater than 0".to_string());
        }
        let ratio = self.pool.daily_fresh_question_ratio;
        if !(0.0..1.0).contains(&ratio) {
            return fail(format!("pool.daily_fresh_question_ratio must be in [0, 1), got {}", ratio));
        }
        if self.daily.daily_horizon_days == 0 {
            return fail("daily.daily_horizon_days must be at least 1".to_string());
        }
        if self.concurrency.max_global == 0 || self.concurrency.max_per_user == 0 {
            return fail("concurrency maxima must be greater than 0".to_string());
        }
        if self.concurrency.max_per_user > self.concurrency.max_global {
            return fail(format!(
                "concurrency.max_per_user ({}) exceeds concurrency.max_global ({})",
                self.concurrency.max_per_user, self.concurrency.max_global
            ));
        }
        // Every in-flight run must be able to report without blocking during shutdown.
        if self.scheduler.channel_capacity < self.concurrency.max_global {
            return fail(format!(
                "scheduler.channel_capacity ({}) is below concurrency.max_global ({})",
                self.scheduler.channel_capacity, self.concurrency.max_global
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return fail("retry.base_delay_ms exceeds retry.max_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.priority.weak_topic_error_rate) {
            return fail("priority.weak_topic_error_rate must be in [0, 1]".to_string());
        }
        if self.generation.option_count < 2 {
            return fail("generation.option_count must be at least 2".to_string());
        }

        let mut codes = HashSet::new();
        for provider in &self.providers {
            if provider.code.is_empty() {
                return fail("provider code must not be empty".to_string());
            }
            if !codes.insert(provider.code.as_str()) {
                return fail(format!("duplicate provider code: {}", provider.code));
            }
            if provider.batch_size == 0 {
                return fail(format!("provider {} has batch_size 0", provider.code));
            }
        }
        if self.provider(&self.generation.default_provider).is_none() {
            return fail(format!(
                "default provider {} is not configured",
                self.generation.default_provider
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.question_refill_threshold, 5);
        assert_eq!(config.pool.daily_fresh_question_ratio, 0.35);
        assert_eq!(config.daily.daily_horizon_days, 1);
        assert_eq!(config.daily.daily_repeat_avoid_days, 7);
        assert_eq!(config.daily.repeat_policy, RepeatPolicy::PreferGoal);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
pool:
  question_refill_threshold: 8
daily:
  repeat_policy: strict_avoid
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.pool.question_refill_threshold, 8);
        assert_eq!(config.pool.daily_fresh_question_ratio, 0.35);
        assert_eq!(config.daily.repeat_policy, RepeatPolicy::StrictAvoid);
        assert_eq!(config.concurrency.max_per_user, 1);
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn test_provider_lookup() {
        let config = Config::default();
        let ollama = config.provider("ollama").unwrap();
        assert_eq!(ollama.batch_size, 1);
        assert!(!ollama.supports_grammar);
        assert!(config.provider("missing").is_none());
    }

    #[test]
    fn test_validate_rejects_ratio_out_of_range() {
        let mut config = Config::default();
        config.pool.daily_fresh_question_ratio = 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("daily_fresh_question_ratio"));
    }

    #[test]
    fn test_validate_rejects_per_user_above_global() {
        let mut config = Config::default();
        config.concurrency.max_global = 2;
        config.concurrency.max_per_user = 3;
        assert!(matches!(config.validate(), Err(QuizpoolError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_channel_smaller_than_global_cap() {
        let mut config = Config::default();
        config.concurrency.max_global = 8;
        config.scheduler.channel_capacity = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("channel_capacity"));

        config.scheduler.channel_capacity = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_provider() {
        let mut config = Config::default();
        let dup = config.providers[0].clone();
        config.providers.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate provider code"));
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.providers[1].batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_default_provider() {
        let mut config = Config::default();
        config.generation.default_provider = "nope".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quizpool.yml");
        fs::write(&path, "scheduler:\n  scan_interval_secs: 5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.scan_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/quizpool.yml");
        assert!(matches!(Config::load(Some(&path)), Err(QuizpoolError::Io(_))));
    }
}

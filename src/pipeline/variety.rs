//! Variety constraint selection.
//!
//! Topic preference: explicit request hint, then weak topics not used in recent
//! batches, then configured topics not used recently, then any configured topic.
//! Grammar focus is only chosen for providers that support it.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::VarietyConfig;
use crate::domain::GenerationChoice;
use crate::generator::VarietyConstraints;

#[derive(Debug, Clone, Default)]
pub struct VarietySelector {
    config: VarietyConfig,
}

impl VarietySelector {
    pub fn new(config: VarietyConfig) -> Self {
        Self { config }
    }

    pub fn topics(&self) -> &[String] {
        &self.config.topics
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        level: &str,
        supports_grammar: bool,
        topic_hint: Option<&str>,
        weak_topics: &[String],
        recent: &[GenerationChoice],
    ) -> VarietyConstraints {
        let recent_topics: HashSet<&str> = recent.iter().filter_map(|c| c.topic.as_deref()).collect();
        let recent_grammar: HashSet<&str> = recent.iter().filter_map(|c| c.grammar_focus.as_deref()).collect();
        let recent_modifiers: HashSet<&str> = recent
            .iter()
            .filter_map(|c| c.difficulty_modifier.as_deref())
            .collect();

        let topic = match topic_hint {
            Some(hint) => Some(hint.to_string()),
            None => {
                let weak: Vec<&String> = weak_topics
                    .iter()
                    .filter(|t| !recent_topics.contains(t.as_str()))
                    .collect();
                if weak.is_empty() {
                    pick_avoiding(rng, &self.config.topics, &recent_topics)
                } else {
                    weak.choose(rng).map(|t| (*t).clone())
                }
            }
        };

        let grammar_focus = if supports_grammar {
            let options = self
                .config
                .grammar_focus_by_level
                .get(level)
                .filter(|list| !list.is_empty())
                .unwrap_or(&self.config.grammar_focus);
            pick_avoiding(rng, options, &recent_grammar)
        } else {
            None
        };

        VarietyConstraints {
            topic,
            grammar_focus,
            difficulty_modifier: pick_avoiding(rng, &self.config.difficulty_modifiers, &recent_modifiers),
        }
    }
}

/// A random item not in `avoid`, or any item once all have been used.
fn pick_avoiding<R: Rng + ?Sized>(rng: &mut R, items: &[String], avoid: &HashSet<&str>) -> Option<String> {
    let unused: Vec<&String> = items.iter().filter(|i| !avoid.contains(i.as_str())).collect();
    if unused.is_empty() {
        items.choose(rng).cloned()
    } else {
        unused.choose(rng).map(|i| (*i).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QuestionType, UserId};
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn choice(topic: &str, grammar: Option<&str>) -> GenerationChoice {
        GenerationChoice {
            user: UserId(1),
            language: "italian".to_string(),
            level: "A2".to_string(),
            question_type: QuestionType::Vocabulary,
            topic: Some(topic.to_string()),
            grammar_focus: grammar.map(str::to_string),
            difficulty_modifier: None,
            created_at: Utc::now(),
        }
    }

    fn selector(topics: &[&str]) -> VarietySelector {
        VarietySelector::new(VarietyConfig {
            topics: topics.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_hint_wins() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = selector(&["food", "travel"]).select(&mut rng, "A2", true, Some("weather"), &["food".to_string()], &[]);
        assert_eq!(c.topic.as_deref(), Some("weather"));
    }

    #[test]
    fn test_weak_topics_preferred_unless_recent() {
        let s = selector(&["food", "travel", "work"]);
        let weak = vec!["travel".to_string()];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let c = s.select(&mut rng, "A2", false, None, &weak, &[]);
            assert_eq!(c.topic.as_deref(), Some("travel"));
        }

        let recent = vec![choice("travel", None)];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let c = s.select(&mut rng, "A2", false, None, &weak, &recent);
            assert_ne!(c.topic.as_deref(), Some("travel"));
        }
    }

    #[test]
    fn test_recent_topics_avoided_until_exhausted() {
        let s = selector(&["food", "travel"]);
        let recent = vec![choice("food", None)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(s.select(&mut rng, "A2", false, None, &[], &recent).topic.as_deref(), Some("travel"));

        let all_recent = vec![choice("food", None), choice("travel", None)];
        let topic = s.select(&mut rng, "A2", false, None, &[], &all_recent).topic;
        assert!(topic.is_some());
    }

    #[test]
    fn test_grammar_only_when_supported() {
        let s = VarietySelector::default();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(s.select(&mut rng, "A2", false, None, &[], &[]).grammar_focus.is_none());

        let grammar = s.select(&mut rng, "A2", true, None, &[], &[]).grammar_focus.unwrap();
        assert!(VarietyConfig::default().grammar_focus_by_level["A2"].contains(&grammar));
    }

    #[test]
    fn test_grammar_falls_back_to_global_list() {
        let s = VarietySelector::default();
        let mut rng = StdRng::seed_from_u64(3);
        let grammar = s.select(&mut rng, "C2", true, None, &[], &[]).grammar_focus.unwrap();
        assert!(VarietyConfig::default().grammar_focus.contains(&grammar));
    }

    #[test]
    fn test_empty_topic_list_yields_no_topic() {
        let s = selector(&[]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(s.select(&mut rng, "A2", false, None, &[], &[]).topic.is_none());
    }
}

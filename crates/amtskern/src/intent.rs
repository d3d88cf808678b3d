//! Intent classification: maps a query to `{domain, complexity, entities}`.
//!
//! A cheap keyword pass runs first; an optional LLM pass refines the result
//! when the keyword pass's confidence is below `llm_confidence_threshold`.
//! Classifier failure never blocks the pipeline — it degrades to the
//! `{domain: general, complexity: standard}` default.

use crate::model::{Complexity, Domain, Intent};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntentError {
    #[error("LLM classification call failed: {0}")]
    LlmFailed(String),
}

#[async_trait]
pub trait LlmIntentRefiner: Send + Sync {
    async fn refine(&self, query: &str, keyword_guess: &Intent) -> Result<Intent, IntentError>;
}

pub struct IntentClassifierConfig {
    pub llm_confidence_threshold: f32,
    pub domain_keywords: HashMap<Domain, Vec<&'static str>>,
}

impl Default for IntentClassifierConfig {
    fn default() -> Self {
        let mut domain_keywords = HashMap::new();
        domain_keywords.insert(
            Domain::Construction,
            vec!["baugenehmigung", "bauantrag", "bebauungsplan", "bauordnung"],
        );
        domain_keywords.insert(
            Domain::Environmental,
            vec!["immissionsschutz", "emission", "umwelt", "bimschg"],
        );
        domain_keywords.insert(Domain::Traffic, vec!["verkehr", "strassenverkehr", "parken"]);
        domain_keywords.insert(Domain::Social, vec!["sozialhilfe", "buergergeld", "wohngeld"]);
        domain_keywords.insert(Domain::Financial, vec!["steuer", "gebuehr", "abgabe"]);
        Self {
            llm_confidence_threshold: 0.6,
            domain_keywords,
        }
    }
}

pub struct IntentClassifier {
    config: IntentClassifierConfig,
    refiner: Option<Box<dyn LlmIntentRefiner>>,
}

impl IntentClassifier {
    pub fn new(config: IntentClassifierConfig) -> Self {
        Self {
            config,
            refiner: None,
        }
    }

    pub fn with_refiner(mut self, refiner: Box<dyn LlmIntentRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub async fn classify(&self, query_text: &str) -> Intent {
        let (keyword_intent, confidence) = self.keyword_pass(query_text);

        if confidence >= self.config.llm_confidence_threshold {
            return keyword_intent;
        }

        let Some(refiner) = &self.refiner else {
            return keyword_intent;
        };

        match refiner.refine(query_text, &keyword_intent).await {
            Ok(refined) => refined,
            Err(err) => {
                warn!(error = %err, "intent refinement failed, using keyword-pass default");
                keyword_intent
            }
        }
    }

    fn keyword_pass(&self, query_text: &str) -> (Intent, f32) {
        let lowercase = query_text.to_lowercase();
        let mut best_domain = Domain::General;
        let mut best_hits = 0usize;

        for (domain, keywords) in &self.config.domain_keywords {
            let hits = keywords.iter().filter(|kw| lowercase.contains(*kw)).count();
            if hits > best_hits {
                best_hits = hits;
                best_domain = *domain;
            }
        }

        let complexity = if lowercase.split_whitespace().count() > 40 {
            Complexity::Complex
        } else if lowercase.split_whitespace().count() > 15 {
            Complexity::Standard
        } else {
            Complexity::Simple
        };

        let confidence = if best_hits == 0 { 0.0 } else { (best_hits as f32 / 3.0).min(1.0) };

        (
            Intent {
                domain: best_domain,
                complexity,
                extracted_entities: Vec::new(),
                extracted_locations: Vec::new(),
            },
            confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_pass_detects_construction_domain() {
        let classifier = IntentClassifier::new(IntentClassifierConfig::default());
        let intent = classifier.classify("Wie beantrage ich eine Baugenehmigung?").await;
        assert_eq!(intent.domain, Domain::Construction);
    }

    #[tokio::test]
    async fn unrecognized_query_defaults_to_general() {
        let classifier = IntentClassifier::new(IntentClassifierConfig::default());
        let intent = classifier.classify("hallo wie geht es dir").await;
        assert_eq!(intent.domain, Domain::General);
    }

    struct FailingRefiner;

    #[async_trait]
    impl LlmIntentRefiner for FailingRefiner {
        async fn refine(&self, _query: &str, _guess: &Intent) -> Result<Intent, IntentError> {
            Err(IntentError::LlmFailed("timeout".into()))
        }
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_keyword_default() {
        let classifier =
            IntentClassifier::new(IntentClassifierConfig::default()).with_refiner(Box::new(FailingRefiner));
        let intent = classifier.classify("hallo wie geht es dir").await;
        assert_eq!(intent.domain, Domain::General);
        assert_eq!(intent.complexity, Complexity::Simple);
    }
}

//! Token Budget Manager: computes the per-call token allowance and, when
//! the assembled prompt overflows it, applies exactly one overflow
//! strategy in the configured priority order.
//!
//! Structurally this keeps this workspace's budget module's shape (a plain
//! config struct, a typed error enum, a stateless-where-possible manager)
//! but replaces cost/token spend tracking with context-window overflow
//! handling, since the two are different concerns: this module governs
//! what fits in one prompt, not how much an agent has spent over time.

use crate::config::{OverflowStrategyKind, TokenBudgetConfig};
use crate::model::{AgentResult, Source};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BudgetError {
    #[error("budget exhausted even after applying every overflow strategy: {0} tokens short")]
    Exhausted(usize),
}

/// Stands in for a real tokenizer so tests do not need a model-specific BPE
/// vocabulary. A deterministic whitespace/character-ratio estimator is the
/// default; adapters can plug in a real tokenizer behind this trait.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        // ~4 characters per token is a reasonable cross-language estimate
        // that does not require a real BPE vocabulary.
        (text.chars().count() / 4).max(text.split_whitespace().count())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAction {
    pub strategy: OverflowStrategyKind,
    pub estimated_tokens_saved: usize,
}

pub struct TokenBudgetManager<'a> {
    config: &'a TokenBudgetConfig,
    counter: &'a dyn TokenCounter,
}

impl<'a> TokenBudgetManager<'a> {
    pub fn new(config: &'a TokenBudgetConfig, counter: &'a dyn TokenCounter) -> Self {
        Self { config, counter }
    }

    /// `context_window - reserved_system - reserved_response - safety_margin`.
    pub fn available_budget(&self, reserved_system_tokens: usize) -> usize {
        self.config
            .context_window_tokens
            .saturating_sub(reserved_system_tokens)
            .saturating_sub(self.config.reserved_response_tokens)
            .saturating_sub(self.config.safety_margin_tokens)
    }

    fn prompt_tokens(&self, sources: &[Source], agent_results: &[AgentResult]) -> usize {
        sources.iter().map(|s| self.counter.count(&s.content)).sum::<usize>()
            + agent_results.iter().map(|a| self.counter.count(&a.summary)).sum::<usize>()
    }

    /// Fits `sources`/`agent_results` within the available budget, applying
    /// the first configured strategy whose precondition holds and whose
    /// estimated savings clear the overflow. Returns the (possibly reduced)
    /// sources/agent_results plus the action taken, or an error if even the
    /// last-resort chunking strategy cannot make the prompt fit above
    /// `min_viable_prompt_tokens`.
    pub fn fit(
        &self,
        sources: Vec<Source>,
        agent_results: Vec<AgentResult>,
        reserved_system_tokens: usize,
    ) -> Result<(Vec<Source>, Vec<AgentResult>, Option<BudgetAction>), BudgetError> {
        let budget = self.available_budget(reserved_system_tokens);
        let used = self.prompt_tokens(&sources, &agent_results);
        if used <= budget {
            return Ok((sources, agent_results, None));
        }
        let overflow = used - budget;

        let mut sources = sources;
        let mut agent_results = agent_results;

        for strategy in self.config.overflow_strategy_priority.clone() {
            match strategy {
                OverflowStrategyKind::RerankAndDrop => {
                    if sources.is_empty() {
                        continue;
                    }
                    let (kept, saved) = self.rerank_and_drop(&sources, overflow);
                    if saved >= overflow && kept.len() < sources.len() {
                        sources = kept;
                        return Ok((
                            sources,
                            agent_results,
                            Some(BudgetAction {
                                strategy,
                                estimated_tokens_saved: saved,
                            }),
                        ));
                    }
                }
                OverflowStrategyKind::SummarizeContext => {
                    let saved = self.summarize_context(&mut sources);
                    if saved >= overflow {
                        return Ok((
                            sources,
                            agent_results,
                            Some(BudgetAction {
                                strategy,
                                estimated_tokens_saved: saved,
                            }),
                        ));
                    }
                }
                OverflowStrategyKind::ReduceAgents => {
                    if agent_results.len() <= 1 {
                        continue;
                    }
                    let saved = self.reduce_agents(&mut agent_results, overflow);
                    if saved >= overflow {
                        return Ok((
                            sources,
                            agent_results,
                            Some(BudgetAction {
                                strategy,
                                estimated_tokens_saved: saved,
                            }),
                        ));
                    }
                }
                OverflowStrategyKind::ChunkedResponse => {
                    // Last resort: signal the caller to switch to multi-part
                    // synthesis rather than trimming content further.
                    if budget < self.config.min_viable_prompt_tokens {
                        return Err(BudgetError::Exhausted(overflow));
                    }
                    return Ok((
                        sources,
                        agent_results,
                        Some(BudgetAction {
                            strategy,
                            estimated_tokens_saved: 0,
                        }),
                    ));
                }
            }
        }

        if budget < self.config.min_viable_prompt_tokens {
            Err(BudgetError::Exhausted(overflow))
        } else {
            Ok((sources, agent_results, None))
        }
    }

    /// Keeps the top-scoring sources (by rerank score, falling back to
    /// quality) until at least `overflow` worth of lower-ranked tokens have
    /// been dropped, always keeping at least one source.
    fn rerank_and_drop(&self, sources: &[Source], overflow: usize) -> (Vec<Source>, usize) {
        let mut ranked: Vec<&Source> = sources.iter().collect();
        ranked.sort_by(|a, b| {
            let score_a = a.scores.rerank.or(a.scores.quality).unwrap_or(0.0);
            let score_b = b.scores.rerank.or(b.scores.quality).unwrap_or(0.0);
            score_b.partial_cmp(&score_a).unwrap()
        });

        let mut dropped_ids = std::collections::HashSet::new();
        let mut dropped_tokens = 0usize;

        for source in ranked.iter().rev() {
            if dropped_tokens >= overflow {
                break;
            }
            if sources.len() - dropped_ids.len() <= 1 {
                break;
            }
            dropped_tokens += self.counter.count(&source.content);
            dropped_ids.insert(source.id.clone());
        }

        let kept: Vec<Source> = sources.iter().filter(|s| !dropped_ids.contains(&s.id)).cloned().collect();
        (kept, dropped_tokens)
    }

    /// Rule-based sentence-extraction summarization: keeps the first two
    /// sentences of each source's content, a cheap compression that needs
    /// no additional LLM round trip.
    fn summarize_context(&self, sources: &mut [Source]) -> usize {
        let mut saved = 0usize;
        for source in sources.iter_mut() {
            let before = self.counter.count(&source.content);
            let summarized: String = source
                .content
                .split_terminator(['.', '\n'])
                .take(2)
                .collect::<Vec<_>>()
                .join(". ");
            if summarized.len() < source.content.len() {
                source.content = summarized;
                let after = self.counter.count(&source.content);
                saved += before.saturating_sub(after);
            }
        }
        saved
    }

    /// Drops the lowest-confidence agent results, keeping at least one.
    fn reduce_agents(&self, agent_results: &mut Vec<AgentResult>, overflow: usize) -> usize {
        agent_results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        let mut saved = 0usize;
        while saved < overflow && agent_results.len() > 1 {
            if let Some(dropped) = agent_results.pop() {
                saved += self.counter.count(&dropped.summary);
            } else {
                break;
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Origin;

    fn config(window: usize) -> TokenBudgetConfig {
        TokenBudgetConfig {
            context_window_tokens: window,
            reserved_response_tokens: 100,
            safety_margin_tokens: 50,
            min_viable_prompt_tokens: 50,
            overflow_strategy_priority: vec![
                OverflowStrategyKind::RerankAndDrop,
                OverflowStrategyKind::SummarizeContext,
                OverflowStrategyKind::ReduceAgents,
                OverflowStrategyKind::ChunkedResponse,
            ],
        }
    }

    #[test]
    fn fits_without_action_when_under_budget() {
        let cfg = config(10_000);
        let counter = WhitespaceTokenCounter;
        let manager = TokenBudgetManager::new(&cfg, &counter);
        let sources = vec![Source::new("s1", Origin::Vector, "a short document")];
        let (kept, _, action) = manager.fit(sources, vec![], 0).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(action.is_none());
    }

    #[test]
    fn overflow_triggers_rerank_and_drop_first() {
        // Budget and overflow are sized so that dropping the single
        // low-scored source clears the overflow on its own; otherwise
        // rerank-and-drop would under-cover it and correctly fall through
        // to the next strategy.
        let cfg = config(300);
        let counter = WhitespaceTokenCounter;
        let manager = TokenBudgetManager::new(&cfg, &counter);

        let big_content = "word ".repeat(100);
        let mut low = Source::new("low", Origin::Vector, big_content.clone());
        low.scores.quality = Some(0.1);
        let mut high = Source::new("high", Origin::Vector, big_content);
        high.scores.quality = Some(0.9);

        let (kept, _, action) = manager.fit(vec![low, high], vec![], 0).unwrap();
        let action = action.expect("should have applied an overflow strategy");
        assert_eq!(action.strategy, OverflowStrategyKind::RerankAndDrop);
        assert!(kept.len() <= 2);
        assert!(kept.iter().any(|s| s.id == "high"));
    }

    #[test]
    fn falls_through_past_rerank_and_drop_when_its_savings_cannot_cover_overflow() {
        // Only one source can ever be dropped (at least one must be kept),
        // so rerank-and-drop's achievable savings (~125 tokens) fall short
        // of the overflow (200 tokens) and the manager must move on rather
        // than accept an under-covering strategy.
        let cfg = config(200);
        let counter = WhitespaceTokenCounter;
        let manager = TokenBudgetManager::new(&cfg, &counter);

        let big_content = "word ".repeat(100);
        let mut low = Source::new("low", Origin::Vector, big_content.clone());
        low.scores.quality = Some(0.1);
        let mut high = Source::new("high", Origin::Vector, big_content);
        high.scores.quality = Some(0.9);

        let (_, _, action) = manager.fit(vec![low, high], vec![], 0).unwrap();
        let action = action.expect("should have applied an overflow strategy");
        assert_ne!(action.strategy, OverflowStrategyKind::RerankAndDrop);
    }

    #[test]
    fn reports_exhausted_when_budget_below_minimum_viable() {
        let cfg = TokenBudgetConfig {
            context_window_tokens: 10,
            reserved_response_tokens: 5,
            safety_margin_tokens: 5,
            min_viable_prompt_tokens: 50,
            overflow_strategy_priority: vec![],
        };
        let counter = WhitespaceTokenCounter;
        let manager = TokenBudgetManager::new(&cfg, &counter);
        let sources = vec![Source::new("s1", Origin::Vector, "word ".repeat(50))];
        let result = manager.fit(sources, vec![], 0);
        assert!(matches!(result, Err(BudgetError::Exhausted(_))));
    }
}

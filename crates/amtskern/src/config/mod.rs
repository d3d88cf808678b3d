//! Orchestrator configuration surface.
//!
//! [`OrchestratorConfig`] enumerates every knob named in this crate's
//! external-interface contract and is the single object passed into the
//! [`crate::controller::PipelineController`] at construction time. Loading it
//! from TOML/YAML/JSON is handled by [`loader`] (gated behind the `config`
//! feature, mirroring how this workspace's kernel crate gates its own file
//! loader) — but `OrchestratorConfig::default()` always works with no feature
//! flags, so unit tests never need a file on disk.

#[cfg(feature = "config")]
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::fusion::FusionStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    pub context_window_tokens: usize,
    pub reserved_response_tokens: usize,
    pub safety_margin_tokens: usize,
    pub min_viable_prompt_tokens: usize,
    pub overflow_strategy_priority: Vec<OverflowStrategyKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategyKind {
    RerankAndDrop,
    SummarizeContext,
    ReduceAgents,
    ChunkedResponse,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: 8192,
            reserved_response_tokens: 1024,
            safety_margin_tokens: 256,
            min_viable_prompt_tokens: 512,
            overflow_strategy_priority: vec![
                OverflowStrategyKind::RerankAndDrop,
                OverflowStrategyKind::SummarizeContext,
                OverflowStrategyKind::ReduceAgents,
                OverflowStrategyKind::ChunkedResponse,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    pub k_rrf: u32,
    pub weight_vector: f32,
    pub weight_graph: f32,
    pub weight_relational: f32,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Rrf,
            k_rrf: 60,
            weight_vector: 0.5,
            weight_graph: 0.3,
            weight_relational: 0.2,
            rerank_enabled: true,
            rerank_top_n: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub per_store_deadline_ms: u64,
    pub max_results_per_store: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_store_deadline_ms: 2_000,
            max_results_per_store: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub max_parallel: usize,
    pub default_timeout_ms: u64,
    pub always_on_agents: Vec<String>,
    pub keyword_triggers: HashMap<String, String>,
    pub max_agents: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_parallel: 6,
            default_timeout_ms: 8_000,
            always_on_agents: vec![
                "retrieval-helper".into(),
                "temporal-helper".into(),
                "legal-framework".into(),
            ],
            keyword_triggers: HashMap::new(),
            max_agents: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model_id: String,
    pub temperature: f32,
    pub streaming: bool,
    pub endpoint: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: "local-default".into(),
            temperature: 0.2,
            streaming: true,
            endpoint: "http://127.0.0.1:8081".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    pub replay_buffer_size: usize,
    pub replay_ttl_seconds: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            replay_buffer_size: 256,
            replay_ttl_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationConfig {
    pub grace_period_ms: u64,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 500,
        }
    }
}

/// The full, exhaustively-documented configuration surface for a
/// [`PipelineController`](crate::controller::PipelineController). Every
/// field here is named in this crate's external-interface contract; callers
/// assemble it once, wrap it in an `Arc`, and treat it as an immutable
/// snapshot for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub token_budget: TokenBudgetConfig,
    pub fusion: FusionConfig,
    pub retrieval: RetrievalConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    pub progress: ProgressConfig,
    pub logging: LoggingConfig,
    pub cancellation: CancellationConfig,
}

//! Pipeline Controller: the linear state machine that drives one query
//! through classification, retrieval, fusion, selection, agent dispatch,
//! budgeting, and synthesis, emitting progress events at every transition
//! and honoring cooperative cancellation throughout.

use crate::budget::{TokenBudgetManager, WhitespaceTokenCounter};
use crate::config::OrchestratorConfig;
use crate::error::{Collaborator, OrchestratorError, OrchestratorResult, Stage};
use crate::fusion::{self, RankedList, Reranker};
use crate::intent::IntentClassifier;
use crate::model::{
    AggregatedContext, EventStatus, ProgressEvent, Query, ResponseStatus, SynthesizedResponse,
};
use crate::progress::ProgressBus;
use crate::registry::AgentRegistry;
use crate::runtime::{AgentExecutor, AgentRuntime, AgentRuntimeConfig};
use crate::selector::AgentSelector;
use crate::store::{StoreGateway, StoreOutcome};
use crate::synthesis::{SynthesisDriver, SynthesisLlm};
use error_stack::{Report, ResultExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the controller needs that is wired in once at startup and
/// shared across runs.
pub struct PipelineController {
    pub config: OrchestratorConfig,
    pub registry: AgentRegistry,
    pub store_gateway: StoreGateway,
    pub intent_classifier: IntentClassifier,
    pub progress: ProgressBus,
}

impl PipelineController {
    pub fn new(
        config: OrchestratorConfig,
        registry: AgentRegistry,
        store_gateway: StoreGateway,
        intent_classifier: IntentClassifier,
    ) -> Self {
        let progress = ProgressBus::new(config.progress.clone());
        Self {
            config,
            registry,
            store_gateway,
            intent_classifier,
            progress,
        }
    }

    /// Runs one query to completion. `executors` binds concrete agent
    /// implementations by id; `llm` drives the final synthesis call.
    /// `run_deadline` bounds the whole run; individual stages subtract
    /// their own elapsed time from it as they go.
    pub async fn run(
        &self,
        query: Query,
        executors: &HashMap<String, Arc<dyn AgentExecutor>>,
        llm: &dyn SynthesisLlm,
        reranker: Option<&dyn Reranker>,
        run_deadline: Duration,
        cancellation: CancellationToken,
    ) -> OrchestratorResult<SynthesizedResponse> {
        let session_id = query.session_id.clone();
        let run_start = Instant::now();

        macro_rules! bail_if_cancelled {
            ($stage:expr) => {
                if cancellation.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(self.config.cancellation.grace_period_ms)).await;
                    self.publish(&session_id, "failed", EventStatus::Error, serde_json::json!({"stage": $stage.to_string()}))
                        .await;
                    return Err(Report::new(OrchestratorError::Cancelled));
                }
            };
        }

        // --- Classifying ---
        self.publish(&session_id, "classifying", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Classifying);
        let intent = self.intent_classifier.classify(&query.text).await;
        self.publish(
            &session_id,
            "classifying",
            EventStatus::Done,
            serde_json::json!({"domain": intent.domain, "complexity": intent.complexity}),
        )
        .await;

        // --- Retrieving ---
        self.publish(&session_id, "retrieving", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Retrieving);
        let filter = HashMap::new();
        let limit = self.config.retrieval.max_results_per_store;
        let (vector, graph, relational) = tokio::join!(
            self.store_gateway.vector_search(&query.text, limit, &filter),
            self.store_gateway.graph_search(&query.text, limit, &filter),
            self.store_gateway.relational_search(&query.text, limit, &filter),
        );

        let mut ranked_lists = Vec::new();
        let mut store_failures = 0;
        for (origin_name, outcome, origin) in [
            ("vector", vector, crate::model::Origin::Vector),
            ("graph", graph, crate::model::Origin::Graph),
            ("relational", relational, crate::model::Origin::Relational),
        ] {
            match outcome {
                StoreOutcome::Ok(sources) => ranked_lists.push(RankedList { origin, sources }),
                StoreOutcome::SoftFailed(err) => {
                    store_failures += 1;
                    warn!(store = origin_name, error = %err, "store retrieval soft-failed, continuing without it");
                    self.publish(
                        &session_id,
                        "retrieving",
                        EventStatus::Error,
                        serde_json::json!({"store": origin_name, "error": err.to_string()}),
                    )
                    .await;
                }
            }
        }
        if store_failures == 3 {
            self.publish(&session_id, "finalizing", EventStatus::Error, serde_json::json!({"kind": "Upstream"}))
                .await;
            return Err(Report::new(OrchestratorError::upstream(
                Collaborator::Store,
                "all three stores failed",
            )));
        }
        self.publish(&session_id, "retrieving", EventStatus::Done, serde_json::Value::Null)
            .await;

        // --- Fusing ---
        self.publish(&session_id, "fusing", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Fusing);
        let mut fused_sources = fusion::fuse(ranked_lists, &self.config.fusion);
        if self.config.fusion.rerank_enabled {
            if let Some(reranker) = reranker {
                fused_sources =
                    fusion::rerank_top_n(fused_sources, &query.text, self.config.fusion.rerank_top_n, reranker).await;
            }
        }
        if let Some(max_sources) = query.options.max_sources {
            fused_sources.truncate(max_sources);
        }
        self.publish(
            &session_id,
            "fusing",
            EventStatus::Done,
            serde_json::json!({"source_count": fused_sources.len()}),
        )
        .await;

        // --- Selecting ---
        self.publish(&session_id, "selecting", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Selecting);
        let selector = AgentSelector::new(&self.registry, &self.config.agents);
        let selected_agents = selector
            .select(&intent, &query.text, &query.options.preferred_agents)
            .await;
        self.publish(
            &session_id,
            "selecting",
            EventStatus::Done,
            serde_json::json!({"agents": selected_agents}),
        )
        .await;

        // --- Dispatching agents ---
        self.publish(&session_id, "dispatching_agents", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::DispatchingAgents);
        let remaining = run_deadline.saturating_sub(run_start.elapsed());
        let runtime = AgentRuntime::new(
            &self.registry,
            AgentRuntimeConfig {
                default_timeout: Duration::from_millis(self.config.agents.default_timeout_ms),
                max_parallel: self.config.agents.max_parallel,
                ..AgentRuntimeConfig::default()
            },
        );
        let context_for_agents = AggregatedContext {
            sources: fused_sources.clone(),
            agent_results: Vec::new(),
            intent: intent.clone(),
            remaining_token_budget: self.config.token_budget.context_window_tokens,
        };
        let agent_results = runtime
            .dispatch(
                &selected_agents,
                executors,
                &query,
                &context_for_agents,
                remaining,
                cancellation.clone(),
            )
            .await;
        for source in agent_results.iter().flat_map(|r| r.produced_sources.clone()) {
            fused_sources.push(source);
        }
        let all_agents_failed = !selected_agents.is_empty()
            && agent_results.iter().all(|r| !matches!(r.status, crate::model::AgentStatus::Ok));
        if all_agents_failed && fused_sources.is_empty() {
            self.publish(&session_id, "finalizing", EventStatus::Error, serde_json::json!({"kind": "Upstream"}))
                .await;
            return Err(Report::new(OrchestratorError::upstream(
                Collaborator::Agent,
                "all selected agents failed and no retrieval sources were available",
            )));
        }
        self.publish(
            &session_id,
            "dispatching_agents",
            EventStatus::Done,
            serde_json::json!({"agent_count": agent_results.len()}),
        )
        .await;

        // --- Budgeting ---
        self.publish(&session_id, "budgeting", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Budgeting);
        let counter = WhitespaceTokenCounter;
        let manager = TokenBudgetManager::new(&self.config.token_budget, &counter);
        let reserved_system_tokens = 200;
        let (fitted_sources, fitted_agent_results, action) = manager
            .fit(fused_sources, agent_results, reserved_system_tokens)
            .change_context(OrchestratorError::Budget("unable to fit prompt within budget".into()))?;
        if let Some(action) = &action {
            info!(strategy = ?action.strategy, saved = action.estimated_tokens_saved, "applied overflow strategy");
        }
        self.publish(
            &session_id,
            "budgeting",
            EventStatus::Done,
            serde_json::json!({"action": action.map(|a| a.strategy)}),
        )
        .await;

        // --- Synthesizing ---
        self.publish(&session_id, "synthesizing", EventStatus::Started, serde_json::Value::Null)
            .await;
        bail_if_cancelled!(Stage::Synthesizing);
        let context = AggregatedContext {
            sources: fitted_sources,
            agent_results: fitted_agent_results,
            intent,
            remaining_token_budget: manager.available_budget(reserved_system_tokens),
        };
        let driver = SynthesisDriver::new(llm, &self.progress, &self.config.llm);
        let response = driver
            .synthesize(&query, &context, cancellation.clone())
            .await
            .map_err(|e| Report::new(OrchestratorError::internal("synthesis", e.to_string())))?;
        self.publish(
            &session_id,
            "synthesizing",
            EventStatus::Done,
            serde_json::json!({"status": response.status}),
        )
        .await;

        // --- Finalizing ---
        if cancellation.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(self.config.cancellation.grace_period_ms)).await;
            self.publish(
                &session_id,
                "finalizing",
                EventStatus::Error,
                serde_json::json!({"kind": "Cancelled", "status": response.status}),
            )
            .await;
        } else {
            self.publish(&session_id, "finalizing", EventStatus::Done, serde_json::Value::Null)
                .await;
        }

        Ok(response)
    }

    async fn publish(&self, session_id: &str, stage: &str, status: EventStatus, payload: serde_json::Value) {
        self.progress
            .publish(ProgressEvent {
                event_id: 0,
                session_id: session_id.to_string(),
                stage: stage.to_string(),
                status,
                payload,
                ts_millis: 0,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::streaming::{BoxTokenStream, StreamChunk, StreamError};
    use crate::model::Origin;
    use crate::store::{StoreClient, StoreError};
    use async_trait::async_trait;

    struct EmptyStore;
    #[async_trait]
    impl StoreClient for EmptyStore {
        async fn search(
            &self,
            _query: &str,
            _limit: usize,
            _filter: &HashMap<String, String>,
        ) -> Result<Vec<crate::model::Source>, StoreError> {
            Ok(vec![crate::model::Source::new("s1", Origin::Vector, "ein Beispieltext")])
        }
    }

    struct EchoLlm;
    #[async_trait]
    impl SynthesisLlm for EchoLlm {
        async fn stream(&self, _prompt: &str, _config: &crate::config::LlmConfig) -> Result<BoxTokenStream, StreamError> {
            let chunks = vec![
                Ok(StreamChunk::text("Die Antwort lautet [1].")),
                Ok(StreamChunk::done(crate::llm::types::FinishReason::Stop)),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    #[tokio::test]
    async fn full_run_produces_a_response() {
        let controller = PipelineController::new(
            OrchestratorConfig::default(),
            AgentRegistry::new(),
            StoreGateway::new(Default::default()).with_vector(Box::new(EmptyStore)),
            IntentClassifier::new(Default::default()),
        );

        let query = Query::new("Wie beantrage ich eine Baugenehmigung?", "session-1");
        let executors: HashMap<String, Arc<dyn AgentExecutor>> = HashMap::new();
        let llm = EchoLlm;

        let response = controller
            .run(query, &executors, &llm, None, Duration::from_secs(5), CancellationToken::new())
            .await
            .unwrap();

        assert!(response.answer_text.contains("Die Antwort"));
    }
}

//! Agent Runtime: dispatches selected agents with bounded parallelism,
//! per-agent timeouts, and cooperative cancellation.

use crate::model::{AgentResult, AggregatedContext, Query};
use crate::registry::AgentRegistry;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What a concrete agent implementation provides; the runtime dispatches
/// against this trait object and never a concrete agent type.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &Query,
        context: &AggregatedContext,
        cancellation: CancellationToken,
    ) -> AgentResult;
}

pub struct AgentRuntimeConfig {
    pub default_timeout: Duration,
    pub acquire_deadline: Duration,
    /// Upper bound on agents running concurrently, independent of how many
    /// were selected. SPEC_FULL §4.6's `N_max` / `agents.max_parallel`.
    pub max_parallel: usize,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(8_000),
            acquire_deadline: Duration::from_millis(2_000),
            max_parallel: 6,
        }
    }
}

pub struct AgentRuntime<'a> {
    registry: &'a AgentRegistry,
    config: AgentRuntimeConfig,
}

impl<'a> AgentRuntime<'a> {
    pub fn new(registry: &'a AgentRegistry, config: AgentRuntimeConfig) -> Self {
        Self { registry, config }
    }

    /// Dispatches `agent_ids` with bounded parallelism (at most
    /// `config.max_parallel` run concurrently, independent of how many were
    /// selected) against their executors. `remaining_run_deadline` is the
    /// time left in the whole run; each agent's effective deadline is
    /// `min(remaining_run_deadline, agent.timeout_hint, config.default_timeout)`.
    /// Any agent's timeout/failure yields a well-formed [`AgentResult`] and
    /// never aborts its siblings. When `cancellation` fires, in-flight
    /// agents that have already finished still contribute their results.
    pub async fn dispatch(
        &self,
        agent_ids: &[String],
        executors: &std::collections::HashMap<String, Arc<dyn AgentExecutor>>,
        query: &Query,
        context: &AggregatedContext,
        remaining_run_deadline: Duration,
        cancellation: CancellationToken,
    ) -> Vec<AgentResult> {
        let mut agent_futures = Vec::with_capacity(agent_ids.len());

        for agent_id in agent_ids {
            let Some(executor) = executors.get(agent_id) else {
                let agent_id = agent_id.clone();
                agent_futures.push(Box::pin(async move {
                    AgentResult::failed(agent_id, "no executor bound for this agent", 0)
                })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = AgentResult> + Send + 'a>>);
                continue;
            };

            let descriptor_timeout = self
                .registry
                .descriptor(agent_id)
                .await
                .map(|d| Duration::from_millis(d.timeout_hint_ms))
                .unwrap_or(self.config.default_timeout);
            let deadline = remaining_run_deadline
                .min(descriptor_timeout)
                .min(self.config.default_timeout);

            let agent_id = agent_id.clone();
            let executor = executor.clone();
            let cancellation = cancellation.clone();
            let query = query.clone();
            let context = context.clone();
            let acquire_deadline = self.config.acquire_deadline;
            let registry = self.registry;

            agent_futures.push(Box::pin(async move {
                let _handle = match registry.acquire(&agent_id, acquire_deadline).await {
                    Ok(handle) => handle,
                    Err(_) => return AgentResult::failed(agent_id, "agent at capacity", 0),
                };

                let start = Instant::now();
                tokio::select! {
                    _ = cancellation.cancelled() => AgentResult::cancelled(agent_id),
                    result = tokio::time::timeout(deadline, executor.execute(&query, &context, cancellation.clone())) => {
                        match result {
                            Ok(mut r) => {
                                r.latency_ms = start.elapsed().as_millis() as u64;
                                r
                            }
                            Err(_) => AgentResult::timeout(agent_id, start.elapsed().as_millis() as u64),
                        }
                    }
                }
            })
                as std::pin::Pin<Box<dyn std::future::Future<Output = AgentResult> + Send + 'a>>);
        }

        let max_parallel = self.config.max_parallel.max(1);
        let mut results: Vec<AgentResult> = futures::stream::iter(agent_futures)
            .buffer_unordered(max_parallel)
            .collect()
            .await;

        // Render downstream in the caller's selection order, not completion order.
        results.sort_by_key(|r| agent_ids.iter().position(|id| id == &r.agent_id).unwrap_or(usize::MAX));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentDescriptor, AgentStatus, Domain};
    use std::collections::HashMap;

    struct OkExecutor;
    #[async_trait]
    impl AgentExecutor for OkExecutor {
        async fn execute(&self, _q: &Query, _c: &AggregatedContext, _t: CancellationToken) -> AgentResult {
            let mut r = AgentResult::cancelled("placeholder");
            r.status = AgentStatus::Ok;
            r.confidence = 0.9;
            r
        }
    }

    struct SlowExecutor;
    #[async_trait]
    impl AgentExecutor for SlowExecutor {
        async fn execute(&self, _q: &Query, _c: &AggregatedContext, _t: CancellationToken) -> AgentResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            AgentResult::cancelled("never")
        }
    }

    fn descriptor(id: &str, timeout_ms: u64) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: id.to_string(),
            domain: Domain::General,
            capabilities: vec![],
            concurrency_cap: 1,
            timeout_hint_ms: timeout_ms,
        }
    }

    #[tokio::test]
    async fn one_slow_agent_times_out_without_blocking_others() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("slow", 30)).await;
        registry.register(descriptor("fast", 5_000)).await;

        let mut executors: HashMap<String, Arc<dyn AgentExecutor>> = HashMap::new();
        executors.insert("slow".into(), Arc::new(SlowExecutor));
        executors.insert("fast".into(), Arc::new(OkExecutor));

        let runtime = AgentRuntime::new(&registry, AgentRuntimeConfig::default());
        let query = Query::new("q", "session-1");
        let context = AggregatedContext::default();

        let results = runtime
            .dispatch(
                &["slow".to_string(), "fast".to_string()],
                &executors,
                &query,
                &context,
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_id, "slow");
        assert_eq!(results[0].status, AgentStatus::Timeout);
        assert_eq!(results[1].agent_id, "fast");
        assert_eq!(results[1].status, AgentStatus::Ok);
    }

    struct TrackingExecutor {
        in_flight: Arc<std::sync::atomic::AtomicUsize>,
        max_observed: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl AgentExecutor for TrackingExecutor {
        async fn execute(&self, _q: &Query, _c: &AggregatedContext, _t: CancellationToken) -> AgentResult {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut r = AgentResult::cancelled("placeholder");
            r.status = AgentStatus::Ok;
            r
        }
    }

    #[tokio::test]
    async fn dispatch_never_exceeds_max_parallel() {
        use std::sync::atomic::AtomicUsize;

        let registry = AgentRegistry::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let mut executors: HashMap<String, Arc<dyn AgentExecutor>> = HashMap::new();
        let mut agent_ids = Vec::new();

        for i in 0..10 {
            let id = format!("agent-{i}");
            registry.register(descriptor(&id, 5_000)).await;
            executors.insert(
                id.clone(),
                Arc::new(TrackingExecutor {
                    in_flight: in_flight.clone(),
                    max_observed: max_observed.clone(),
                }) as Arc<dyn AgentExecutor>,
            );
            agent_ids.push(id);
        }

        let runtime = AgentRuntime::new(
            &registry,
            AgentRuntimeConfig {
                max_parallel: 3,
                ..AgentRuntimeConfig::default()
            },
        );

        let results = runtime
            .dispatch(
                &agent_ids,
                &executors,
                &Query::new("q", "session-1"),
                &AggregatedContext::default(),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 10);
        assert!(
            max_observed.load(std::sync::atomic::Ordering::SeqCst) <= 3,
            "never more than max_parallel agents should run concurrently"
        );
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled_status_for_in_flight_agents() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("slow", 5_000)).await;

        let mut executors: HashMap<String, Arc<dyn AgentExecutor>> = HashMap::new();
        executors.insert("slow".into(), Arc::new(SlowExecutor));

        let runtime = AgentRuntime::new(&registry, AgentRuntimeConfig::default());
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });

        let results = runtime
            .dispatch(
                &["slow".to_string()],
                &executors,
                &Query::new("q", "s"),
                &AggregatedContext::default(),
                Duration::from_secs(5),
                token,
            )
            .await;

        assert_eq!(results[0].status, AgentStatus::Cancelled);
    }
}

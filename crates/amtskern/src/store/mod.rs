//! Store Gateway: a uniform, read-only interface over the three
//! heterogeneous retrieval backends (dense-vector, graph, relational).
//!
//! Each store is addressed through [`StoreClient`], the same shape as this
//! crate's vector-store trait (`search(query, limit, filter) -> records`)
//! generalised to cover graph and relational backends too, so the gateway
//! itself stays generic over the concrete transport and owns only
//! timeout/retry policy.

use crate::model::{Origin, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store call timed out")]
    Timeout,
    #[error("bad request to store: {0}")]
    BadRequest(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Connection-class errors are eligible for a single retry; decoded
    /// application errors (bad request) are not.
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unreachable(_) | StoreError::Timeout)
    }
}

/// A single store client's contract. One impl per backend (vector, graph,
/// relational); the filter's shape is backend-specific so it is passed as
/// an opaque key/value bag.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Source>, StoreError>;
}

pub struct StoreGatewayConfig {
    pub per_store_deadline: Duration,
    pub max_results: usize,
}

impl Default for StoreGatewayConfig {
    fn default() -> Self {
        Self {
            per_store_deadline: Duration::from_millis(2_000),
            max_results: 20,
        }
    }
}

/// Fans out to all three stores the caller wires in. Each call has an
/// independent deadline; a deadline expiry or upstream failure is reported
/// as an empty list, never as a failure that aborts the whole gateway call.
pub struct StoreGateway {
    vector: Option<Box<dyn StoreClient>>,
    graph: Option<Box<dyn StoreClient>>,
    relational: Option<Box<dyn StoreClient>>,
    config: StoreGatewayConfig,
}

/// The outcome of one store's search: either a ranked list, or a soft
/// failure the controller should surface on the progress bus without
/// aborting the run.
pub enum StoreOutcome {
    Ok(Vec<Source>),
    SoftFailed(StoreError),
}

impl StoreGateway {
    pub fn new(config: StoreGatewayConfig) -> Self {
        Self {
            vector: None,
            graph: None,
            relational: None,
            config,
        }
    }

    pub fn with_vector(mut self, client: Box<dyn StoreClient>) -> Self {
        self.vector = Some(client);
        self
    }

    pub fn with_graph(mut self, client: Box<dyn StoreClient>) -> Self {
        self.graph = Some(client);
        self
    }

    pub fn with_relational(mut self, client: Box<dyn StoreClient>) -> Self {
        self.relational = Some(client);
        self
    }

    pub async fn vector_search(
        &self,
        query: &str,
        k: usize,
        filter: &HashMap<String, String>,
    ) -> StoreOutcome {
        self.call(self.vector.as_deref(), query, k, filter, Origin::Vector)
            .await
    }

    pub async fn graph_search(
        &self,
        query: &str,
        k: usize,
        filter: &HashMap<String, String>,
    ) -> StoreOutcome {
        self.call(self.graph.as_deref(), query, k, filter, Origin::Graph)
            .await
    }

    pub async fn relational_search(
        &self,
        query: &str,
        k: usize,
        filter: &HashMap<String, String>,
    ) -> StoreOutcome {
        self.call(self.relational.as_deref(), query, k, filter, Origin::Relational)
            .await
    }

    async fn call(
        &self,
        client: Option<&dyn StoreClient>,
        query: &str,
        k: usize,
        filter: &HashMap<String, String>,
        origin: Origin,
    ) -> StoreOutcome {
        let Some(client) = client else {
            return StoreOutcome::Ok(Vec::new());
        };
        let limit = k.min(self.config.max_results);

        match self.call_with_deadline(client, query, limit, filter).await {
            Ok(sources) => StoreOutcome::Ok(sources),
            Err(err) if err.is_retryable() => {
                warn!(?origin, error = %err, "store call failed, retrying once");
                match self.call_with_deadline(client, query, limit, filter).await {
                    Ok(sources) => StoreOutcome::Ok(sources),
                    Err(err) => StoreOutcome::SoftFailed(err),
                }
            }
            Err(err) => StoreOutcome::SoftFailed(err),
        }
    }

    async fn call_with_deadline(
        &self,
        client: &dyn StoreClient,
        query: &str,
        limit: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Source>, StoreError> {
        match tokio::time::timeout(
            self.config.per_store_deadline,
            client.search(query, limit, filter),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

//! Agent Registry: a capability-addressed directory of [`AgentDescriptor`]s
//! with bounded-concurrency instance acquisition.
//!
//! Structurally this mirrors this workspace's runtime agent registry (a
//! `HashMap` of entries behind an `RwLock`, plus a capability index for
//! `by_capability` lookups), extended with a `tokio::sync::Semaphore` per
//! agent so `acquire`/`release` can cooperatively block when an agent's
//! `concurrency_cap` is saturated — a mechanism the reference registry does
//! not need since it manages agent lifecycle, not per-call concurrency.

use crate::model::AgentDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::info;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("agent '{0}' is not registered")]
    NotFound(String),
    #[error("agent '{0}' is at capacity and the caller's deadline expired")]
    Busy(String),
}

struct CapabilityIndex {
    by_capability: HashMap<String, Vec<String>>,
}

impl CapabilityIndex {
    fn new() -> Self {
        Self {
            by_capability: HashMap::new(),
        }
    }

    fn index(&mut self, agent_id: &str, capabilities: &[String]) {
        for cap in capabilities {
            let ids = self.by_capability.entry(cap.clone()).or_default();
            if !ids.contains(&agent_id.to_string()) {
                ids.push(agent_id.to_string());
            }
        }
    }

    fn unindex(&mut self, agent_id: &str) {
        for ids in self.by_capability.values_mut() {
            ids.retain(|id| id != agent_id);
        }
    }
}

struct RegistryEntry {
    descriptor: AgentDescriptor,
    semaphore: Arc<Semaphore>,
}

/// An acquired slot against one agent's `concurrency_cap`. Releases the
/// slot when dropped, so `release` is guaranteed on every exit path
/// including panics and early returns — callers never need to remember to
/// call it explicitly.
pub struct AgentHandle {
    agent_id: String,
    _permit: OwnedSemaphorePermit,
}

impl AgentHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

/// The process-wide agent directory. The only mutable shared state in the
/// core besides the progress bus.
pub struct AgentRegistry {
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
    capability_index: Arc<RwLock<CapabilityIndex>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            capability_index: Arc::new(RwLock::new(CapabilityIndex::new())),
        }
    }

    /// Idempotent: re-registering an `agent_id` replaces the descriptor
    /// silently (existing in-flight handles keep their old semaphore until
    /// released).
    pub async fn register(&self, descriptor: AgentDescriptor) {
        let agent_id = descriptor.agent_id.clone();
        let cap = descriptor.concurrency_cap.max(1);

        {
            let mut index = self.capability_index.write().await;
            index.index(&agent_id, &descriptor.capabilities);
        }

        let mut entries = self.entries.write().await;
        let replaced = entries.insert(
            agent_id.clone(),
            RegistryEntry {
                descriptor,
                semaphore: Arc::new(Semaphore::new(cap)),
            },
        );
        if replaced.is_some() {
            info!(agent_id, "replaced existing agent registration");
        } else {
            info!(agent_id, "registered agent");
        }
    }

    pub async fn descriptor(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let entries = self.entries.read().await;
        entries.get(agent_id).map(|e| e.descriptor.clone())
    }

    /// Stable ordering by first registration order is not guaranteed across
    /// concurrent registrations, but within a single-threaded setup phase
    /// (the common case) insertion order is preserved by construction.
    pub async fn by_capability(&self, capability: &str) -> Vec<String> {
        let index = self.capability_index.read().await;
        index.by_capability.get(capability).cloned().unwrap_or_default()
    }

    /// Blocks cooperatively while the agent's `concurrency_cap` is
    /// saturated, up to `deadline`; fails with [`RegistryError::Busy`] if
    /// the deadline expires first.
    pub async fn acquire(&self, agent_id: &str, deadline: Duration) -> Result<AgentHandle, RegistryError> {
        let semaphore = {
            let entries = self.entries.read().await;
            entries
                .get(agent_id)
                .map(|e| e.semaphore.clone())
                .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?
        };

        match tokio::time::timeout(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AgentHandle {
                agent_id: agent_id.to_string(),
                _permit: permit,
            }),
            // The semaphore is never explicitly closed, so Err(AcquireError)
            // cannot occur in practice; treat it the same as a timeout.
            Ok(Err(_)) | Err(_) => Err(RegistryError::Busy(agent_id.to_string())),
        }
    }

    pub async fn unregister(&self, agent_id: &str) -> bool {
        {
            let mut index = self.capability_index.write().await;
            index.unindex(agent_id);
        }
        let mut entries = self.entries.write().await;
        entries.remove(agent_id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Domain;

    fn descriptor(id: &str, cap: usize) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: id.to_string(),
            domain: Domain::General,
            capabilities: vec!["legal_framework".to_string()],
            concurrency_cap: cap,
            timeout_hint_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn register_then_find_by_capability() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("a1", 2)).await;
        let found = registry.by_capability("legal_framework").await;
        assert_eq!(found, vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn reregistering_same_id_keeps_capability_index_stable() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("a1", 2)).await;
        registry.register(descriptor("a1", 2)).await;
        let found = registry.by_capability("legal_framework").await;
        assert_eq!(found, vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn acquire_blocks_when_saturated_then_succeeds_after_release() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(descriptor("a1", 1)).await;

        let first = registry.acquire("a1", Duration::from_millis(50)).await.unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire("a1", Duration::from_millis(200)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        let second = waiter.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn acquire_fails_busy_after_deadline() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("a1", 1)).await;
        let _first = registry.acquire("a1", Duration::from_millis(50)).await.unwrap();

        let second = registry.acquire("a1", Duration::from_millis(20)).await;
        assert!(matches!(second, Err(RegistryError::Busy(_))));
    }

    #[tokio::test]
    async fn acquire_unknown_agent_errors() {
        let registry = AgentRegistry::new();
        let result = registry.acquire("ghost", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn counter_returns_to_full_capacity_after_release() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("a1", 2)).await;
        let h1 = registry.acquire("a1", Duration::from_millis(10)).await.unwrap();
        let h2 = registry.acquire("a1", Duration::from_millis(10)).await.unwrap();
        drop(h1);
        drop(h2);
        // A third and fourth acquire should both succeed immediately,
        // proving the semaphore count returned to its original capacity.
        let h3 = registry.acquire("a1", Duration::from_millis(10)).await;
        let h4 = registry.acquire("a1", Duration::from_millis(10)).await;
        assert!(h3.is_ok());
        assert!(h4.is_ok());
    }
}

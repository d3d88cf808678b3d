//! Agent Selector: deterministically chooses a subset of registered agents
//! for one run, given `{Intent, fused_sources, caller preferences}`.

use crate::config::AgentsConfig;
use crate::model::{Domain, Intent};
use crate::registry::AgentRegistry;

pub struct AgentSelector<'a> {
    registry: &'a AgentRegistry,
    config: &'a AgentsConfig,
}

impl<'a> AgentSelector<'a> {
    pub fn new(registry: &'a AgentRegistry, config: &'a AgentsConfig) -> Self {
        Self { registry, config }
    }

    /// Same inputs always produce the same ordered selection:
    /// always-on agents, then domain-matched agents, then keyword-triggered
    /// agents, then caller-preferred agents — each added only once, in that
    /// order, and capped at `max_agents`.
    pub async fn select(&self, intent: &Intent, query_text: &str, preferred_agents: &[String]) -> Vec<String> {
        let mut selected: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let mut push = |id: String, selected: &mut Vec<String>, seen: &mut std::collections::HashSet<String>| {
            if seen.insert(id.clone()) {
                selected.push(id);
            }
        };

        for id in &self.config.always_on_agents {
            push(id.clone(), &mut selected, &mut seen);
        }

        for id in self.registry.by_capability(&domain_capability(intent.domain)).await {
            push(id, &mut selected, &mut seen);
        }

        let lowercase_query = query_text.to_lowercase();
        for (keyword, agent_id) in &self.config.keyword_triggers {
            if lowercase_query.contains(keyword.as_str()) {
                push(agent_id.clone(), &mut selected, &mut seen);
            }
        }

        for id in preferred_agents {
            push(id.clone(), &mut selected, &mut seen);
        }

        selected.truncate(self.config.max_agents);
        selected
    }
}

fn domain_capability(domain: Domain) -> String {
    match domain {
        Domain::Construction => "construction".to_string(),
        Domain::Environmental => "environmental".to_string(),
        Domain::Traffic => "traffic".to_string(),
        Domain::Social => "social".to_string(),
        Domain::Financial => "financial".to_string(),
        Domain::General => "general".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentDescriptor, Complexity};

    async fn registry_with(capability: &str, agent_id: &str) -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor {
                agent_id: agent_id.to_string(),
                domain: Domain::Construction,
                capabilities: vec![capability.to_string()],
                concurrency_cap: 1,
                timeout_hint_ms: 1_000,
            })
            .await;
        registry
    }

    #[tokio::test]
    async fn same_inputs_yield_same_selection() {
        let registry = registry_with("construction", "construction-agent").await;
        let config = AgentsConfig::default();
        let selector = AgentSelector::new(&registry, &config);
        let intent = Intent {
            domain: Domain::Construction,
            complexity: Complexity::Standard,
            extracted_entities: vec![],
            extracted_locations: vec![],
        };

        let first = selector.select(&intent, "Baugenehmigung", &[]).await;
        let second = selector.select(&intent, "Baugenehmigung", &[]).await;
        assert_eq!(first, second);
        assert!(first.contains(&"construction-agent".to_string()));
    }

    #[tokio::test]
    async fn preferred_agents_are_included_and_deduplicated() {
        let registry = AgentRegistry::new();
        let config = AgentsConfig::default();
        let selector = AgentSelector::new(&registry, &config);
        let intent = Intent::default();

        let selected = selector
            .select(&intent, "hallo", &["retrieval-helper".to_string(), "custom".to_string()])
            .await;

        assert_eq!(selected.iter().filter(|a| a.as_str() == "retrieval-helper").count(), 1);
        assert!(selected.contains(&"custom".to_string()));
    }

    #[tokio::test]
    async fn selection_is_capped_at_max_agents() {
        let registry = AgentRegistry::new();
        let mut config = AgentsConfig::default();
        config.always_on_agents = vec!["a".into(), "b".into(), "c".into()];
        config.max_agents = 2;
        let selector = AgentSelector::new(&registry, &config);

        let selected = selector.select(&Intent::default(), "q", &[]).await;
        assert_eq!(selected.len(), 2);
    }
}

//! Core data model shared by every pipeline stage.
//!
//! These types are intentionally plain data: construction and validation
//! live with the component that owns the relevant invariant (the registry
//! owns `AgentDescriptor` uniqueness, the controller owns `Query` lifetime,
//! and so on) rather than on the structs themselves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A caller-supplied question, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub locale: Option<String>,
    pub session_id: String,
    pub options: CallerOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locale: None,
            session_id: session_id.into(),
            options: CallerOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerOptions {
    pub preferred_agents: Vec<String>,
    pub max_sources: Option<usize>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Construction,
    Environmental,
    Traffic,
    Social,
    Financial,
    General,
}

impl Default for Domain {
    fn default() -> Self {
        Domain::General
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
    VeryComplex,
}

impl Default for Complexity {
    fn default() -> Self {
        Complexity::Standard
    }
}

/// Classifier output. Always produced, even on classifier failure (defaults apply).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub domain: Domain,
    pub complexity: Complexity,
    pub extracted_entities: Vec<String>,
    pub extracted_locations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Vector,
    Graph,
    Relational,
    Agent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceScores {
    pub similarity: Option<f32>,
    pub graph_distance: Option<u32>,
    pub relational_rank: Option<u32>,
    pub rerank: Option<f32>,
    pub quality: Option<f32>,
}

/// The canonical retrieval unit flowing from stores through fusion into synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub origin: Origin,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub scores: SourceScores,
    /// 1-based position in the fused list; set by the fusion stage.
    pub rank: u32,
}

impl Source {
    pub fn new(id: impl Into<String>, origin: Origin, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin,
            content: content.into(),
            metadata: HashMap::new(),
            scores: SourceScores::default(),
            rank: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub domain: Domain,
    pub capabilities: Vec<String>,
    pub concurrency_cap: usize,
    pub timeout_hint_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    Timeout,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: AgentStatus,
    pub confidence: f32,
    pub summary: String,
    pub structured_fields: HashMap<String, serde_json::Value>,
    pub produced_sources: Vec<Source>,
    pub latency_ms: u64,
}

impl AgentResult {
    pub fn cancelled(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Cancelled,
            confidence: 0.0,
            summary: String::new(),
            structured_fields: HashMap::new(),
            produced_sources: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn failed(agent_id: impl Into<String>, reason: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Failed,
            confidence: 0.0,
            summary: reason.into(),
            structured_fields: HashMap::new(),
            produced_sources: Vec::new(),
            latency_ms,
        }
    }

    pub fn timeout(agent_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Timeout,
            confidence: 0.0,
            summary: "agent exceeded its deadline".into(),
            structured_fields: HashMap::new(),
            produced_sources: Vec::new(),
            latency_ms,
        }
    }
}

/// The running context the controller threads through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedContext {
    pub sources: Vec<Source>,
    pub agent_results: Vec<AgentResult>,
    pub intent: Intent,
    pub remaining_token_budget: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Progress,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_id: u64,
    pub session_id: String,
    pub stage: String,
    pub status: EventStatus,
    pub payload: serde_json::Value,
    pub ts_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Done,
    Partial,
    MultiPart,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredMetadata {
    pub next_steps: Vec<NextStep>,
    pub related_topics: Vec<String>,
    pub raw_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStep {
    pub action: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    pub answer_text: String,
    pub citations: Vec<String>,
    pub structured_metadata: StructuredMetadata,
    pub confidence: f32,
    pub model_id: String,
    pub duration_ms: u64,
    pub agent_ids: Vec<String>,
    pub source_ids: Vec<String>,
    pub status: ResponseStatus,
    pub part_index: Option<u32>,
    pub part_count: Option<u32>,
}

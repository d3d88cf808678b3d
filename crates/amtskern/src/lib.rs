// Shared domain types: queries, sources, aggregated context, progress events.
pub mod model;
pub use model::*;

// Typed error hierarchy (thiserror + error-stack).
pub mod error;
pub use error::{OrchestratorError, OrchestratorResult, Stage};

// Unified configuration system.
pub mod config;

// Structured logging init.
pub mod logging;

// Multi-store retrieval gateway (vector / graph / relational).
pub mod store;

// Score-and-rank fusion across store result lists.
pub mod fusion;

// Intent classification.
pub mod intent;

// Agent registry and capability lookup.
pub mod registry;

// Agent selection policy.
pub mod selector;

// Agent execution runtime (timeouts, concurrency, cancellation).
pub mod runtime;

// Token budget management and overflow strategies.
pub mod budget;

// LLM streaming types and the final synthesis driver.
pub mod llm;
pub mod synthesis;

// Session-keyed progress event bus.
pub mod progress;

// Prompt templating.
pub mod template;

// The pipeline controller that drives one query end to end.
pub mod controller;
pub use controller::PipelineController;

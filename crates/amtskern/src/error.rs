//! Crate-level error types for `amtskern`.
//!
//! Provides a unified [`OrchestratorError`] that composes errors from every
//! sub-module together with [`error_stack::Report`] for context-carrying
//! error propagation, the same layering the rest of this crate's modules use.
//!
//! ```rust,ignore
//! use amtskern::error::{OrchestratorError, OrchestratorResult};
//! use error_stack::ResultExt;
//!
//! fn load() -> OrchestratorResult<()> {
//!     std::fs::read_to_string("agent.toml")
//!         .map_err(OrchestratorError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading agent.toml")?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Which pipeline stage a timeout or failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Classifying,
    Retrieving,
    Fusing,
    Selecting,
    DispatchingAgents,
    Budgeting,
    Synthesizing,
    Finalizing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Classifying => "classifying",
            Stage::Retrieving => "retrieving",
            Stage::Fusing => "fusing",
            Stage::Selecting => "selecting",
            Stage::DispatchingAgents => "dispatching_agents",
            Stage::Budgeting => "budgeting",
            Stage::Synthesizing => "synthesizing",
            Stage::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// Which external collaborator an `Upstream` failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Store,
    Llm,
    Agent,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Collaborator::Store => "store",
            Collaborator::Llm => "llm",
            Collaborator::Agent => "agent",
        };
        f.write_str(s)
    }
}

/// Crate-level error type. Every fallible public entry point returns
/// `Result<T, error_stack::Report<OrchestratorError>>` so callers can attach
/// human-readable context as the error propagates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The run was cancelled by the caller; terminal, not retryable.
    #[error("run cancelled")]
    Cancelled,

    /// A stage exceeded its deadline.
    #[error("stage {0} timed out")]
    Timeout(Stage),

    /// A collaborator (store, LLM, agent) failed in a way the pipeline
    /// could not route around.
    #[error("upstream {collaborator} failure: {cause}")]
    Upstream {
        collaborator: Collaborator,
        cause: String,
    },

    /// A collaborator returned output that violated its contract.
    #[error("{component} returned an ill-formed result: {detail}")]
    Contract { component: String, detail: String },

    /// Not enough tokens remained even after every overflow strategy.
    #[error("token budget exhausted: {0}")]
    Budget(String),

    /// A precondition internal to the orchestrator was violated; indicates a bug.
    #[error("internal error in {component}: {detail}")]
    Internal { component: String, detail: String },

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("config error: {0}")]
    Config(#[from] crate::config::loader::ConfigError),

    /// A low-level I/O error, surfaced unchanged from a collaborator call.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn internal(component: impl Into<String>, detail: impl Into<String>) -> Self {
        OrchestratorError::Internal {
            component: component.into(),
            detail: detail.into(),
        }
    }

    pub fn upstream(collaborator: Collaborator, cause: impl Into<String>) -> Self {
        OrchestratorError::Upstream {
            collaborator,
            cause: cause.into(),
        }
    }

    pub fn contract(component: impl Into<String>, detail: impl Into<String>) -> Self {
        OrchestratorError::Contract {
            component: component.into(),
            detail: detail.into(),
        }
    }
}

/// Convenience result alias using [`error_stack::Report`].
pub type OrchestratorResult<T> = Result<T, error_stack::Report<OrchestratorError>>;

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::{Report, ResultExt};

    #[test]
    fn timeout_display_includes_stage() {
        let err = OrchestratorError::Timeout(Stage::Retrieving);
        assert!(err.to_string().contains("retrieving"));
    }

    #[test]
    fn upstream_display_includes_collaborator_and_cause() {
        let err = OrchestratorError::upstream(Collaborator::Store, "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("store"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: OrchestratorError = io_err.into();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }

    #[test]
    fn report_carries_attached_context() {
        let result: OrchestratorResult<()> =
            Err(Report::new(OrchestratorError::internal("budget", "overflow unresolved")))
                .attach("while applying overflow strategy");

        let report = result.unwrap_err();
        let display = format!("{report:?}");
        assert!(display.contains("overflow unresolved"));
        assert!(display.contains("while applying overflow strategy"));
    }
}

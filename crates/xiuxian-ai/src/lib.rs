//! The LLM gateway for the cultivation-world simulator.
//!
//! Planners, resolvers, and story generators all talk to remote models
//! through one bounded gateway: a semaphore caps in-flight requests,
//! each call carries a task name that routes it to the normal or fast
//! model, prompts are rendered from on-disk templates, and responses
//! come back as parsed JSON values -- structural validation stays with
//! the caller. Failures are returned as values, never thrown into the
//! engine; repeated failures trip a health flag the orchestrator can
//! pause on.
//!
//! # Modules
//!
//! - [`backend`] -- HTTP backends (OpenAI-compatible, Anthropic,
//!   scripted) behind enum dispatch.
//! - [`prompt`] -- minijinja template loading and rendering.
//! - [`parse`] -- JSON extraction with recovery strategies.
//! - [`gateway`] -- The bounded, task-routed, health-tracked gateway.
//! - [`cost`] -- Token and cost accounting per task.

pub mod backend;
pub mod cost;
pub mod gateway;
pub mod parse;
pub mod prompt;

pub use gateway::{GatewayConfig, LlmGateway, TaskMode};

/// Errors produced by the gateway and its collaborators.
///
/// Every variant is recoverable from the engine's point of view: the
/// affected avatar simply gets no plan, nickname, or story this tick.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// A template failed to load or render.
    #[error("template error: {0}")]
    Template(String),

    /// The HTTP request could not be made or completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("llm endpoint returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The call exceeded the per-request deadline.
    #[error("llm call for task '{task}' timed out after {ms} ms")]
    Timeout {
        /// The task that timed out.
        task: String,
        /// The deadline in milliseconds.
        ms: u64,
    },

    /// The response text contained no parsable JSON object.
    #[error("llm response had no parsable JSON: {0}")]
    Shape(String),

    /// The gateway is shutting down and no permits remain.
    #[error("llm gateway closed")]
    Closed,
}

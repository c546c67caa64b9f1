//! Turn execution for gh-agent.
//!
//! A turn flows through [`service::AgentService`]: the caller is
//! authenticated, the session is resolved in the ledger, the
//! [`engine::ReasoningEngine`] plans an ordered batch of tool calls, the
//! [`dispatcher::Dispatcher`] runs them against the [`tool::ToolRegistry`],
//! and the engine's summary plus the full trace are committed as one turn.

pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod service;
pub mod tool;
pub mod tools;

pub use dispatcher::Dispatcher;
pub use engine::{ChatCompletionsEngine, ReasoningEngine, ScriptedEngine, UnavailableEngine};
pub use service::{AgentService, TurnError, TurnOutcome, TurnRequest};
pub use tool::{Tool, ToolCall, ToolContext, ToolError, ToolRegistry, ToolSpec};

//! Typed tool contract and the name → handler registry.
//!
//! Each tool declares its argument and output types; the registry erases
//! them behind JSON so the dispatcher never needs to know which concrete
//! tool a name maps to.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use gha_core::error::ErrorKind;
use gha_core::types::SessionToken;
use gha_integrations::fork_resolver::ResolveError;
use gha_integrations::host::{HostError, RepoHost};
use gha_integrations::repo_cache::{CacheError, RepoTreeCache};
use gha_integrations::types::{HostUser, RepoName, RepoNameError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) | ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::InvalidInput(_) => ErrorKind::InvalidInput,
            ToolError::Host(e) => e.kind(),
            ToolError::Resolve(e) => e.kind(),
            ToolError::Cache(e) => e.kind(),
        }
    }
}

impl From<RepoNameError> for ToolError {
    fn from(err: RepoNameError) -> Self {
        ToolError::InvalidInput(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Calls and context
// ---------------------------------------------------------------------------

/// One tool invocation requested by the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Everything a tool may touch during one turn.
///
/// `host` is bound to the caller's credential.
#[derive(Clone)]
pub struct ToolContext {
    pub host: Arc<dyn RepoHost>,
    pub user: HostUser,
    pub session: SessionToken,
    pub cache: Arc<RepoTreeCache>,
}

impl ToolContext {
    /// Parse a repository argument; a bare `repo` belongs to the caller.
    pub fn repo(&self, raw: &str) -> Result<RepoName, ToolError> {
        Ok(RepoName::qualify(raw, &self.user.login)?)
    }

    /// Fail unless the caller's credential can see `repo`.
    ///
    /// The tree cache is shared by every caller, so each read of a cached
    /// snapshot goes through this check first.
    pub async fn ensure_visible(&self, repo: &RepoName) -> Result<(), ToolError> {
        self.host.repository(repo).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Function-tool description advertised to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn description(&self) -> &'static str;

    fn parameters(&self) -> Value;

    async fn call(&self, ctx: &ToolContext, args: Self::Args) -> Result<Self::Output, ToolError>;
}

#[async_trait]
trait ErasedTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

struct Typed<T>(T);

#[async_trait]
impl<T: Tool> ErasedTool for Typed<T> {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: T::NAME.to_string(),
            description: self.0.description().to_string(),
            parameters: self.0.parameters(),
        }
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        // Engines send `{}` or nothing at all for argument-less tools.
        let args = if args.is_null() { Value::Object(Default::default()) } else { args };
        let args: T::Args =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let output = self.0.call(ctx, args).await?;
        serde_json::to_value(output).map_err(|e| ToolError::InvalidInput(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name → handler table. Built once at startup, then shared read-only.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn ErasedTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`, replacing any earlier tool with the same name.
    pub fn register<T: Tool>(&mut self, tool: T) -> &mut Self {
        if self.tools.insert(T::NAME, Box::new(Typed(tool))).is_some() {
            tracing::warn!(tool = T::NAME, "tool registered twice; keeping the latest");
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// Run the tool registered under `name` with JSON arguments.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.invoke(ctx, args).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gha_integrations::testing::FakeHost;
    use serde_json::json;

    pub(crate) fn context(host: Arc<FakeHost>) -> ToolContext {
        ToolContext {
            host,
            user: HostUser {
                login: "alice".into(),
                id: 1,
                name: Some("Alice".into()),
            },
            session: SessionToken::generate(),
            cache: Arc::new(RepoTreeCache::new(0.75)),
        }
    }

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        times: Option<usize>,
    }

    #[async_trait]
    impl Tool for Echo {
        const NAME: &'static str = "echo";
        type Args = EchoArgs;
        type Output = String;

        fn description(&self) -> &'static str {
            "Repeat text."
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] })
        }

        async fn call(&self, _ctx: &ToolContext, args: EchoArgs) -> Result<String, ToolError> {
            Ok(args.text.repeat(args.times.unwrap_or(1)))
        }
    }

    #[tokio::test]
    async fn typed_dispatch_through_json() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let ctx = context(Arc::new(FakeHost::new("alice")));

        let out = registry
            .execute("echo", json!({ "text": "ab", "times": 2 }), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!("abab"));

        let err = registry.execute("echo", json!({ "times": 2 }), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = registry.execute("nope", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "nope"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn specs_are_advertised() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).register(Echo);
        assert_eq!(registry.len(), 1);
        let spec = &registry.specs()[0];
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.parameters["required"][0], "text");
    }

    #[test]
    fn short_repo_names_use_caller_login() {
        let ctx = context(Arc::new(FakeHost::new("alice")));
        assert_eq!(ctx.repo("demo").unwrap().full_name(), "alice/demo");
        assert_eq!(ctx.repo("upstream/demo").unwrap().full_name(), "upstream/demo");
        assert_eq!(ctx.repo("a/b/c").unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}

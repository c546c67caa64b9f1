//! Reasoning-engine boundary.
//!
//! The engine turns a rendered conversation context into an ordered batch of
//! tool calls, and after execution turns the results into a reply. It is
//! constructed once at startup and shared read-only as
//! `Arc<dyn ReasoningEngine>`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gha_core::config::EngineConfig;
use gha_core::error::ErrorKind;
use gha_core::types::ToolOutput;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::dispatcher::ExecutedCall;
use crate::tool::{ToolCall, ToolSpec};

const SYSTEM_PROMPT: &str = "You are GitHub-Agent, a helpful assistant that operates on GitHub \
on behalf of the authenticated user.

Use the available tools to answer. When users ask about themselves, their username or session, \
call get_user_info. Before reading files in a repository you have not explored, call \
cache_repo_structure so misspelled paths can be resolved. To open a pull request call \
create_pull_request; it works out fork relationships itself.

Answer user queries concisely and directly.";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reasoning engine API key missing: set ${0}")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("reasoning engine not initialized: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalApi
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout
        } else {
            EngineError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Choose the ordered tool calls for `context`.
    async fn plan(&self, context: &str, tools: &[ToolSpec]) -> Result<Vec<ToolCall>, EngineError>;

    /// Produce the final reply once every planned call has run.
    async fn summarize(
        &self,
        context: &str,
        executed: &[ExecutedCall],
    ) -> Result<String, EngineError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible adapter
// ---------------------------------------------------------------------------

/// Chat Completions client with function tools (Groq, OpenAI, vLLM, ...).
pub struct ChatCompletionsEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionsEngine {
    /// Build from config, reading the key from the configured environment
    /// variable.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EngineError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn plan_body(&self, context: &str, tools: &[ToolSpec]) -> Value {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": context },
            ],
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn summary_body(&self, context: &str, executed: &[ExecutedCall]) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": context },
                { "role": "user", "content": render_results(executed) },
            ],
        })
    }

    async fn complete(&self, body: &Value) -> Result<ResponseMessage, EngineError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(EngineError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EngineError::Api { status, message });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| EngineError::Parse("no choices in response".into()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[async_trait]
impl ReasoningEngine for ChatCompletionsEngine {
    async fn plan(&self, context: &str, tools: &[ToolSpec]) -> Result<Vec<ToolCall>, EngineError> {
        let message = self.complete(&self.plan_body(context, tools)).await?;
        let calls: Vec<ToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let raw = tc.function.arguments.unwrap_or_default();
                // Malformed arguments are left for the tool to reject inline.
                let arguments = if raw.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
                };
                ToolCall::new(tc.function.name, arguments)
            })
            .collect();
        tracing::debug!(model = %self.model, calls = calls.len(), "engine planned tool calls");
        Ok(calls)
    }

    async fn summarize(
        &self,
        context: &str,
        executed: &[ExecutedCall],
    ) -> Result<String, EngineError> {
        let message = self.complete(&self.summary_body(context, executed)).await?;
        Ok(message.content.unwrap_or_default().trim().to_string())
    }
}

/// Tool results as plain text for the summary request.
fn render_results(executed: &[ExecutedCall]) -> String {
    if executed.is_empty() {
        return "No tools were called. Reply to the user directly.".to_string();
    }
    let mut out = String::from("Tool results, in the order they ran:\n");
    for (idx, ex) in executed.iter().enumerate() {
        let result = match &ex.output {
            ToolOutput::Success(v) => v.to_string(),
            ToolOutput::Error { kind, message } => format!("ERROR ({kind}): {message}"),
        };
        out.push_str(&format!(
            "{}. {}({}) -> {}\n",
            idx + 1,
            ex.call.name,
            ex.call.arguments,
            result
        ));
    }
    out.push_str("\nWrite the final answer for the user based on these results.");
    out
}

// ---------------------------------------------------------------------------
// UnavailableEngine
// ---------------------------------------------------------------------------

/// Stand-in used when the real engine could not be initialized at startup.
/// Every turn fails with the startup error; liveness reports it.
pub struct UnavailableEngine {
    reason: String,
}

impl UnavailableEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ReasoningEngine for UnavailableEngine {
    async fn plan(&self, _context: &str, _tools: &[ToolSpec]) -> Result<Vec<ToolCall>, EngineError> {
        Err(EngineError::Unavailable(self.reason.clone()))
    }

    async fn summarize(
        &self,
        _context: &str,
        _executed: &[ExecutedCall],
    ) -> Result<String, EngineError> {
        Err(EngineError::Unavailable(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

/// Engine that replays queued plans and summaries.
///
/// With an empty queue it plans no calls and replies `"Done."`. Every
/// context it receives is captured for assertions.
#[derive(Default)]
pub struct ScriptedEngine {
    plans: Mutex<VecDeque<Result<Vec<ToolCall>, EngineError>>>,
    summaries: Mutex<VecDeque<Result<String, EngineError>>>,
    contexts: Mutex<Vec<String>>,
    summarized: Mutex<Vec<Vec<ExecutedCall>>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, calls: Vec<ToolCall>) -> Self {
        locked(&self.plans).push_back(Ok(calls));
        self
    }

    pub fn with_plan_error(self, error: EngineError) -> Self {
        locked(&self.plans).push_back(Err(error));
        self
    }

    pub fn with_summary(self, summary: impl Into<String>) -> Self {
        locked(&self.summaries).push_back(Ok(summary.into()));
        self
    }

    pub fn with_summary_error(self, error: EngineError) -> Self {
        locked(&self.summaries).push_back(Err(error));
        self
    }

    /// Contexts passed to `plan`, in call order.
    pub fn contexts(&self) -> Vec<String> {
        locked(&self.contexts).clone()
    }

    /// Executed batches passed to `summarize`, in call order.
    pub fn summarized(&self) -> Vec<Vec<ExecutedCall>> {
        locked(&self.summarized).clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn plan(&self, context: &str, _tools: &[ToolSpec]) -> Result<Vec<ToolCall>, EngineError> {
        locked(&self.contexts).push(context.to_string());
        locked(&self.plans).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn summarize(
        &self,
        _context: &str,
        executed: &[ExecutedCall],
    ) -> Result<String, EngineError> {
        locked(&self.summarized).push(executed.to_vec());
        locked(&self.summaries)
            .pop_front()
            .unwrap_or_else(|| Ok("Done.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn completions(State(seen): State<Seen>, Json(body): Json<Value>) -> Response {
        locked(&seen).push(body.clone());
        if body["model"] == "overloaded" {
            return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down").into_response();
        }
        if body["model"] == "broken" {
            return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        }
        if body.get("tools").is_some() {
            Json(json!({
                "choices": [{ "message": { "content": null, "tool_calls": [
                    { "id": "1", "type": "function", "function": {
                        "name": "get_user_info", "arguments": "{}" } },
                    { "id": "2", "type": "function", "function": {
                        "name": "get_file_content",
                        "arguments": "{\"repo_name\":\"demo\",\"file_path\":\"README.md\"}" } },
                    { "id": "3", "type": "function", "function": {
                        "name": "resolve_repo_path", "arguments": "{not json" } }
                ]}}]
            }))
            .into_response()
        } else {
            Json(json!({ "choices": [{ "message": { "content": "  All done.  " } }] })).into_response()
        }
    }

    async fn serve() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1/"), seen)
    }

    fn config(base_url: &str, model: &str) -> EngineConfig {
        EngineConfig {
            base_url: base_url.to_string(),
            model: model.to_string(),
            ..EngineConfig::default()
        }
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: "d".into(),
            parameters: json!({ "type": "object" }),
        }
    }

    #[tokio::test]
    async fn plan_reads_tool_calls_in_order() {
        let (url, seen) = serve().await;
        let engine = ChatCompletionsEngine::with_api_key(&config(&url, "m"), "k").unwrap();

        let calls = engine
            .plan("[Current Query]\nwho am I", &[spec("get_user_info")])
            .await
            .unwrap();
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["get_user_info", "get_file_content", "resolve_repo_path"]);
        assert_eq!(calls[1].arguments["repo_name"], "demo");
        assert_eq!(calls[2].arguments, json!("{not json"));

        let body = locked(&seen)[0].clone();
        assert_eq!(body["tools"][0]["function"]["name"], "get_user_info");
        assert_eq!(body["messages"][1]["content"], "[Current Query]\nwho am I");
    }

    #[tokio::test]
    async fn summarize_returns_trimmed_content() {
        let (url, seen) = serve().await;
        let engine = ChatCompletionsEngine::with_api_key(&config(&url, "m"), "k").unwrap();
        let executed = vec![ExecutedCall {
            call: ToolCall::new("get_user_info", json!({})),
            output: ToolOutput::Success(json!({ "login": "alice" })),
        }];

        let reply = engine.summarize("ctx", &executed).await.unwrap();
        assert_eq!(reply, "All done.");
        let body = locked(&seen)[0].clone();
        assert!(body.get("tools").is_none());
        assert!(body["messages"][2]["content"]
            .as_str()
            .unwrap()
            .contains("get_user_info({}) -> {\"login\":\"alice\"}"));
    }

    #[tokio::test]
    async fn http_failures_are_classified() {
        let (url, _) = serve().await;
        let engine = ChatCompletionsEngine::with_api_key(&config(&url, "overloaded"), "k").unwrap();
        let err = engine.plan("ctx", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::RateLimited { retry_after_secs: Some(7) }));

        let engine = ChatCompletionsEngine::with_api_key(&config(&url, "broken"), "k").unwrap();
        let err = engine.summarize("ctx", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Api { status: 500, .. }));
        assert_eq!(err.kind(), ErrorKind::ExternalApi);
    }

    #[test]
    fn missing_key_is_reported_by_variable_name() {
        let cfg = EngineConfig {
            api_key_env: "GHA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..EngineConfig::default()
        };
        let err = ChatCompletionsEngine::from_config(&cfg).err().unwrap();
        assert!(err.to_string().contains("GHA_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test]
    async fn scripted_engine_replays_queue() {
        let engine = ScriptedEngine::new()
            .with_plan(vec![ToolCall::new("a", json!({}))])
            .with_summary("first");

        assert_eq!(engine.plan("c1", &[]).await.unwrap().len(), 1);
        assert_eq!(engine.summarize("c1", &[]).await.unwrap(), "first");
        assert!(engine.plan("c2", &[]).await.unwrap().is_empty());
        assert_eq!(engine.summarize("c2", &[]).await.unwrap(), "Done.");
        assert_eq!(engine.contexts(), ["c1", "c2"]);
    }

    #[tokio::test]
    async fn unavailable_engine_always_fails() {
        let engine = UnavailableEngine::new("GROQ_API_KEY not set");
        let err = engine.plan("ctx", &[]).await.unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY not set"));
        assert!(engine.summarize("ctx", &[]).await.is_err());
    }
}

//! One turn, end to end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gha_core::error::ErrorKind;
use gha_core::ledger::{Ledger, LedgerError};
use gha_core::types::{AssistantOutput, Conversation, Session, SessionToken, ToolTrace, TurnId};
use gha_integrations::host::{Credential, HostConnector, HostError, RepoHost};
use gha_integrations::repo_cache::RepoTreeCache;
use gha_integrations::types::HostUser;
use serde::Serialize;
use thiserror::Error;

use crate::context::render_context;
use crate::dispatcher::Dispatcher;
use crate::engine::{EngineError, ReasoningEngine};
use crate::tool::{ToolContext, ToolSpec};

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Display name supplied by the client; only used for the default query.
    pub user: String,
    pub query: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub session: SessionToken,
    pub output: AssistantOutput,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionHistory {
    pub session: Session,
    pub turns: Vec<Conversation>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TurnFailure {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("reasoning engine failed: {0}")]
    Engine(#[from] EngineError),
}

impl TurnFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnFailure::Authentication(_) => ErrorKind::Authentication,
            TurnFailure::PermissionDenied(_) => ErrorKind::PermissionDenied,
            TurnFailure::Host(e) => e.kind(),
            TurnFailure::Ledger(e) => e.kind(),
            TurnFailure::Engine(e) => e.kind(),
        }
    }
}

/// A fatal turn failure. Nothing was persisted for the turn; whatever the
/// dispatcher had already recorded is carried for diagnosis.
#[derive(Debug, Error)]
#[error("{failure}")]
pub struct TurnError {
    pub failure: TurnFailure,
    pub session: Option<SessionToken>,
    pub tools_responses: ToolTrace,
}

impl TurnError {
    fn new(failure: impl Into<TurnFailure>, session: Option<&SessionToken>) -> Self {
        Self {
            failure: failure.into(),
            session: session.cloned(),
            tools_responses: ToolTrace::new(),
        }
    }

    fn with_trace(mut self, trace: ToolTrace) -> Self {
        self.tools_responses = trace;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.failure.kind()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct AgentService {
    ledger: Arc<Ledger>,
    connector: Arc<dyn HostConnector>,
    engine: Arc<dyn ReasoningEngine>,
    dispatcher: Dispatcher,
    cache: Arc<RepoTreeCache>,
    specs: Vec<ToolSpec>,
}

impl AgentService {
    pub fn new(
        ledger: Arc<Ledger>,
        connector: Arc<dyn HostConnector>,
        engine: Arc<dyn ReasoningEngine>,
        dispatcher: Dispatcher,
        cache: Arc<RepoTreeCache>,
    ) -> Self {
        let specs = dispatcher.registry().specs();
        Self {
            ledger,
            connector,
            engine,
            dispatcher,
            cache,
            specs,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Resolve the caller's identity from their credential.
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<(Arc<dyn RepoHost>, HostUser), TurnFailure> {
        let host = self.connector.connect(credential).map_err(auth_failure)?;
        let user = host.authenticated_user().await.map_err(auth_failure)?;
        Ok((host, user))
    }

    /// Run one query as a turn and persist it.
    ///
    /// The session's writer lock is held from history read to commit, so
    /// concurrent turns on one session are applied one after the other.
    pub async fn handle_query(
        &self,
        credential: &Credential,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        let (host, user) = self
            .authenticate(credential)
            .await
            .map_err(|f| TurnError::new(f, None))?;

        let session = self
            .ledger
            .get_or_create_session(&user.login, request.session_id.as_deref())
            .await
            .map_err(|e| TurnError::new(e, None))?;
        let token = session.token.clone();
        if session.username != user.login {
            tracing::warn!(session = %token, owner = %session.username, caller = %user.login, "session owned by another user");
            return Err(TurnError::new(
                TurnFailure::PermissionDenied(format!("session {token} belongs to another user")),
                None,
            ));
        }

        let writer = self
            .ledger
            .begin_turn(&token)
            .await
            .map_err(|e| TurnError::new(e, Some(&token)))?;
        let history = writer
            .history()
            .await
            .map_err(|e| TurnError::new(e, Some(&token)))?;

        let display_name = if request.user.trim().is_empty() {
            user.login.clone()
        } else {
            request.user.clone()
        };
        let query = request
            .query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| format!("Hello from {display_name}"));
        let context = render_context(&history, &query);

        tracing::info!(session = %token, user = %user.login, prior_messages = history.len(), "turn started");

        let ctx = ToolContext {
            host,
            user,
            session: token.clone(),
            cache: self.cache.clone(),
        };
        let calls = self
            .engine
            .plan(&context, &self.specs)
            .await
            .map_err(|e| TurnError::new(e, Some(&token)))?;
        let dispatch = self.dispatcher.dispatch(&calls, &ctx).await;

        let summary = match self.engine.summarize(&context, &dispatch.executed).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(session = %token, error = %e, "summary failed; turn dropped");
                return Err(TurnError::new(e, Some(&token)).with_trace(dispatch.trace));
            }
        };

        let output = AssistantOutput {
            tools_responses: dispatch.trace,
            final_assistant_response: summary,
        };
        let timestamp = request.timestamp.unwrap_or_else(Utc::now);
        let turn_id = match writer.commit(&query, &output, timestamp).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(session = %token, error = %e, "turn could not be persisted");
                return Err(TurnError::new(e, Some(&token)).with_trace(output.tools_responses));
            }
        };

        tracing::info!(session = %token, turn_id, tools = output.tools_responses.len(), "turn finished");
        Ok(TurnOutcome {
            turn_id,
            session: token,
            output,
            timestamp,
        })
    }

    /// Session metadata and its most recent turns, oldest first, for the
    /// session's owner only.
    pub async fn session_history(
        &self,
        credential: &Credential,
        token: &str,
        limit: usize,
    ) -> Result<SessionHistory, TurnError> {
        let (_, user) = self
            .authenticate(credential)
            .await
            .map_err(|f| TurnError::new(f, None))?;

        let not_found = || TurnError::new(LedgerError::SessionNotFound(token.to_string()), None);
        let token = SessionToken::parse(token).ok_or_else(not_found)?;
        let session = self
            .ledger
            .get_session(&token)
            .await
            .map_err(|e| TurnError::new(e, None))?
            .ok_or_else(not_found)?;
        if session.username != user.login {
            return Err(TurnError::new(
                TurnFailure::PermissionDenied(format!("session {token} belongs to another user")),
                None,
            ));
        }

        let turns = self
            .ledger
            .list_turns(&token, limit)
            .await
            .map_err(|e| TurnError::new(e, Some(&token)))?;
        Ok(SessionHistory { session, turns })
    }
}

fn auth_failure(err: HostError) -> TurnFailure {
    match err {
        HostError::Authentication(msg) => TurnFailure::Authentication(msg),
        other => TurnFailure::Host(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;
    use crate::tool::ToolCall;
    use crate::tools::builtin_registry;
    use gha_core::ledger::DEFAULT_TURN_LIMIT;
    use gha_core::types::Role;
    use gha_integrations::testing::{FakeConnector, FakeHost};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        service: Arc<AgentService>,
        engine: Arc<ScriptedEngine>,
        alice: Credential,
    }

    async fn harness(engine: ScriptedEngine) -> Harness {
        let alice = Arc::new(FakeHost::new("alice"));
        alice.add_repo("upstream/demo").add_branch("upstream/demo", "main");
        alice
            .add_fork("alice/demo", "upstream/demo")
            .add_branch("alice/demo", "main")
            .add_branch("alice/demo", "feature");
        let bob = Arc::new(FakeHost::new("bob"));

        let connector = FakeConnector::new()
            .with("tok-alice", alice)
            .with("tok-bob", bob);
        let engine = Arc::new(engine);
        let service = AgentService::new(
            Arc::new(Ledger::open_in_memory().await.unwrap()),
            Arc::new(connector),
            engine.clone(),
            Dispatcher::new(Arc::new(builtin_registry()), Duration::from_secs(5), 1000),
            Arc::new(RepoTreeCache::new(0.75)),
        );
        Harness {
            service: Arc::new(service),
            engine,
            alice: Credential::new("tok-alice"),
        }
    }

    fn query(q: &str, session: Option<&SessionToken>) -> TurnRequest {
        TurnRequest {
            user: "alice".into(),
            query: Some(q.into()),
            timestamp: None,
            session_id: session.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn two_turns_on_one_session() {
        let h = harness(
            ScriptedEngine::new()
                .with_plan(vec![ToolCall::new("get_user_info", json!({}))])
                .with_summary("You are alice.")
                .with_summary("Bye."),
        )
        .await;

        let first = h.service.handle_query(&h.alice, query("who am I?", None)).await.unwrap();
        assert_eq!(first.turn_id, 1);
        assert_eq!(first.output.tools_responses.len(), 1);

        let second = h
            .service
            .handle_query(&h.alice, query("bye", Some(&first.session)))
            .await
            .unwrap();
        assert_eq!(second.turn_id, 2);
        assert_eq!(second.session, first.session);

        let history = h.service.ledger().get_history(&first.session).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            contents,
            [
                (Role::User, "who am I?"),
                (Role::Assistant, "You are alice."),
                (Role::User, "bye"),
                (Role::Assistant, "Bye."),
            ]
        );

        let contexts = h.engine.contexts();
        assert!(!contexts[0].contains("[Previous Conversation]"));
        assert!(contexts[1].contains("User: who am I?"));
        assert!(contexts[1].ends_with("[Current Query]\nbye"));
    }

    #[tokio::test]
    async fn unknown_token_gets_a_fresh_session() {
        let h = harness(ScriptedEngine::new()).await;
        let req = TurnRequest {
            session_id: Some("not-a-real-session".into()),
            ..query("hi", None)
        };
        let out = h.service.handle_query(&h.alice, req).await.unwrap();
        assert_ne!(out.session.as_str(), "not-a-real-session");
        assert_eq!(out.turn_id, 1);
    }

    #[tokio::test]
    async fn bad_credential_is_fatal_and_persists_nothing() {
        let h = harness(ScriptedEngine::new()).await;
        let err = h
            .service
            .handle_query(&Credential::new("nope"), query("hi", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.session.is_none());
        assert!(h.engine.contexts().is_empty());
    }

    #[tokio::test]
    async fn foreign_session_is_rejected() {
        let h = harness(ScriptedEngine::new()).await;
        let first = h.service.handle_query(&h.alice, query("hi", None)).await.unwrap();

        let err = h
            .service
            .handle_query(&Credential::new("tok-bob"), query("let me in", Some(&first.session)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        let history = h.service.ledger().get_history(&first.session).await.unwrap();
        assert_eq!(history.len(), 2);

        let err = h
            .service
            .session_history(&Credential::new("tok-bob"), first.session.as_str(), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn failing_call_does_not_abort_the_batch() {
        let h = harness(ScriptedEngine::new().with_plan(vec![
            ToolCall::new("delete_everything", json!({})),
            ToolCall::new("get_file_content", json!({ "repo_name": "demo" })),
            ToolCall::new("get_user_info", json!({})),
        ]))
        .await;

        let out = h.service.handle_query(&h.alice, query("go", None)).await.unwrap();
        let records = out.output.tools_responses.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].output.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(records[1].output.error_kind(), Some(ErrorKind::InvalidInput));
        assert!(!records[2].output.is_error());
        assert_eq!(h.engine.summarized()[0].len(), 3);
    }

    #[tokio::test]
    async fn fork_pull_request_end_to_end() {
        let h = harness(ScriptedEngine::new().with_plan(vec![ToolCall::new(
            "create_pull_request",
            json!({ "repo_name": "alice/demo", "title": "Feature", "head": "feature", "base": "main" }),
        )]))
        .await;

        let out = h.service.handle_query(&h.alice, query("open a PR", None)).await.unwrap();
        let gha_core::types::ToolOutput::Success(result) = &out.output.tools_responses.records()[0].output else {
            panic!("pull request tool failed");
        };
        assert_eq!(result["head_repo"], "alice/demo");
        assert_eq!(result["base_repo"], "upstream/demo");
        assert_eq!(result["cross_repository"], true);
        assert_eq!(result["head"], "alice:feature");
    }

    #[tokio::test]
    async fn engine_failure_after_dispatch_keeps_trace_but_persists_nothing() {
        let h = harness(
            ScriptedEngine::new()
                .with_plan(vec![ToolCall::new("get_user_info", json!({}))])
                .with_summary_error(EngineError::Timeout),
        )
        .await;

        let err = h.service.handle_query(&h.alice, query("hi", None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalApi);
        assert_eq!(err.tools_responses.len(), 1);
        let session = err.session.clone().unwrap();
        assert!(h.service.ledger().get_history(&session).await.unwrap().is_empty());
        assert!(h
            .service
            .ledger()
            .list_turns(&session, DEFAULT_TURN_LIMIT)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_query_defaults_to_greeting() {
        let h = harness(ScriptedEngine::new()).await;
        let req = TurnRequest {
            query: None,
            ..query("", None)
        };
        h.service.handle_query(&h.alice, req).await.unwrap();
        assert_eq!(h.engine.contexts()[0], "[Current Query]\nHello from alice");
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_serialize() {
        let h = harness(ScriptedEngine::new()).await;
        let first = h.service.handle_query(&h.alice, query("start", None)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let service = h.service.clone();
            let cred = h.alice.clone();
            let req = query(&format!("q{i}"), Some(&first.session));
            handles.push(tokio::spawn(async move {
                service.handle_query(&cred, req).await.map(|o| o.turn_id)
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, [2, 3, 4, 5]);

        let history = h
            .service
            .session_history(&h.alice, first.session.as_str(), DEFAULT_TURN_LIMIT)
            .await
            .unwrap();
        assert_eq!(history.turns.len(), 5);
        assert_eq!(history.session.history.len(), 10);
        // Each turn saw every earlier turn: prior-turn counts are 1..=4 in some order.
        let mut prior: Vec<usize> = h.engine.contexts()[1..]
            .iter()
            .map(|c| c.matches("User: ").count())
            .collect();
        prior.sort_unstable();
        assert_eq!(prior, [1, 2, 3, 4]);
    }
}

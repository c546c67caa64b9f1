use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_rusqlite::Connection;

use crate::error::ErrorKind;
use crate::types::{
    AssistantOutput, ChatMessage, Conversation, Role, Session, SessionToken, TurnId,
};

/// Default number of turns returned by [`Ledger::list_turns`].
pub const DEFAULT_TURN_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::SessionNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Persistence,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Durable, append-only store of sessions and conversation turns.
///
/// Two relations back it: `sessions` (token, username, timestamps and the
/// cumulative JSON history) and `conversations` (one immutable row per
/// turn). A turn is committed to both in one SQLite transaction.
///
/// Writers to a session are serialized through a per-session async lock;
/// see [`Ledger::begin_turn`].
pub struct Ledger {
    conn: Connection,
    writers: DashMap<SessionToken, Arc<Mutex<()>>>,
}

impl Ledger {
    /// Open (or create) a ledger database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        let ledger = Self::with_connection(conn);
        ledger.init_schema().await?;
        tracing::info!(path = %path.display(), "ledger opened");
        Ok(ledger)
    }

    /// Purely in-memory ledger (tests, ephemeral runs).
    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().await?;
        let ledger = Self::with_connection(conn);
        ledger.init_schema().await?;
        Ok(ledger)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            writers: DashMap::new(),
        }
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS sessions (
                        token       TEXT PRIMARY KEY,
                        username    TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL,
                        history     TEXT NOT NULL DEFAULT '[]'
                    );

                    CREATE TABLE IF NOT EXISTS conversations (
                        turn_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        session_token    TEXT NOT NULL REFERENCES sessions(token),
                        timestamp        TEXT NOT NULL,
                        user_query       TEXT NOT NULL,
                        assistant_output TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_conversations_session
                        ON conversations(session_token, turn_id);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Return the session for a known token unchanged, or create a fresh one
    /// with an empty history under a newly allocated token.
    pub async fn get_or_create_session(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<Session, LedgerError> {
        if let Some(known) = token.and_then(SessionToken::parse) {
            if let Some(session) = self.get_session(&known).await? {
                return Ok(session);
            }
            tracing::debug!(token = %known, "unknown session token, allocating a new one");
        }

        let token = SessionToken::generate();
        let now = Utc::now();
        let session = Session {
            token: token.clone(),
            username: username.to_string(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        };

        let token_str = token.as_str().to_string();
        let username = session.username.clone();
        let stamp = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token, username, created_at, updated_at, history)
                     VALUES (?1, ?2, ?3, ?3, '[]')",
                    rusqlite::params![token_str, username, stamp],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(session = %token, user = %session.username, "session created");
        Ok(session)
    }

    /// Load a session by token. Returns `None` if not found.
    pub async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, LedgerError> {
        let token_str = token.as_str().to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT token, username, created_at, updated_at, history
                         FROM sessions WHERE token = ?1",
                        rusqlite::params![token_str],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((token, username, created_at, updated_at, history)) = row else {
            return Ok(None);
        };
        Ok(Some(Session {
            token: SessionToken::parse(&token)
                .ok_or_else(|| LedgerError::SessionNotFound(token.clone()))?,
            username,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            history: serde_json::from_str(&history)?,
        }))
    }

    /// Ordered, role-tagged history of a session.
    pub async fn get_history(&self, token: &SessionToken) -> Result<Vec<ChatMessage>, LedgerError> {
        self.get_session(token)
            .await?
            .map(|s| s.history)
            .ok_or_else(|| LedgerError::SessionNotFound(token.to_string()))
    }

    /// The `limit` most recent turns of a session, oldest first.
    pub async fn list_turns(
        &self,
        token: &SessionToken,
        limit: usize,
    ) -> Result<Vec<Conversation>, LedgerError> {
        if self.get_session(token).await?.is_none() {
            return Err(LedgerError::SessionNotFound(token.to_string()));
        }

        let token_str = token.as_str().to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT turn_id, timestamp, user_query, assistant_output FROM (
                         SELECT turn_id, timestamp, user_query, assistant_output
                         FROM conversations WHERE session_token = ?1
                         ORDER BY turn_id DESC LIMIT ?2
                     ) ORDER BY turn_id ASC",
                )?;
                let mut rows = stmt.query(rusqlite::params![token_str, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((
                        row.get::<_, TurnId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ));
                }
                Ok(out)
            })
            .await?;

        rows.into_iter()
            .map(|(turn_id, timestamp, user_query, output)| {
                Ok(Conversation {
                    turn_id,
                    session_token: token.clone(),
                    timestamp: parse_timestamp(&timestamp)?,
                    user_query,
                    assistant_output: serde_json::from_str(&output)?,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    /// Acquire exclusive write access to a session.
    ///
    /// The returned [`TurnWriter`] holds the session's lock until it is
    /// committed or dropped, so a caller can read history, run the turn and
    /// append it without another turn of the same session interleaving.
    pub async fn begin_turn(&self, token: &SessionToken) -> Result<TurnWriter<'_>, LedgerError> {
        let lock = self.writers.entry(token.clone()).or_default().value().clone();
        let writer = TurnWriter {
            ledger: self,
            token: token.clone(),
            guard: Some(lock.lock_owned().await),
        };

        if self.get_session(token).await?.is_none() {
            return Err(LedgerError::SessionNotFound(token.to_string()));
        }
        Ok(writer)
    }

    /// Append a completed turn in one step.
    pub async fn append_turn(
        &self,
        token: &SessionToken,
        user_query: &str,
        output: &AssistantOutput,
        timestamp: DateTime<Utc>,
    ) -> Result<TurnId, LedgerError> {
        self.begin_turn(token)
            .await?
            .commit(user_query, output, timestamp)
            .await
    }

    async fn commit_turn(
        &self,
        token: &SessionToken,
        user_query: &str,
        output: &AssistantOutput,
        timestamp: DateTime<Utc>,
    ) -> Result<TurnId, LedgerError> {
        let token_str = token.as_str().to_string();
        let query = user_query.to_string();
        let output = output.clone();
        let output_json = serde_json::to_string(&output)?;

        let committed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let history: Option<String> = tx
                    .query_row(
                        "SELECT history FROM sessions WHERE token = ?1",
                        rusqlite::params![token_str],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(history) = history else {
                    return Ok(None);
                };
                let mut history: Vec<ChatMessage> =
                    serde_json::from_str(&history).map_err(other)?;

                let stamp = timestamp.to_rfc3339();
                tx.execute(
                    "INSERT INTO conversations (session_token, timestamp, user_query, assistant_output)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![token_str, stamp, query, output_json],
                )?;
                let turn_id = tx.last_insert_rowid();

                history.push(ChatMessage {
                    role: Role::User,
                    content: query,
                    turn_id,
                    timestamp,
                    tools_responses: None,
                });
                history.push(ChatMessage {
                    role: Role::Assistant,
                    content: output.final_assistant_response,
                    turn_id,
                    timestamp,
                    tools_responses: Some(output.tools_responses),
                });
                let history = serde_json::to_string(&history).map_err(other)?;

                tx.execute(
                    "UPDATE sessions SET history = ?1, updated_at = ?2 WHERE token = ?3",
                    rusqlite::params![history, Utc::now().to_rfc3339(), token_str],
                )?;
                tx.commit()?;
                Ok(Some(turn_id))
            })
            .await?;

        let turn_id = committed.ok_or_else(|| LedgerError::SessionNotFound(token.to_string()))?;
        tracing::info!(session = %token, turn_id, "turn committed");
        Ok(turn_id)
    }
}

/// Exclusive write handle for one session; see [`Ledger::begin_turn`].
pub struct TurnWriter<'a> {
    ledger: &'a Ledger,
    token: SessionToken,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnWriter<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the lock: no writer is queued behind us.
        self.ledger
            .writers
            .remove_if(&self.token, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl TurnWriter<'_> {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// History as of the start of this turn.
    pub async fn history(&self) -> Result<Vec<ChatMessage>, LedgerError> {
        self.ledger.get_history(&self.token).await
    }

    /// Persist the turn atomically and release the session.
    pub async fn commit(
        self,
        user_query: &str,
        output: &AssistantOutput,
        timestamp: DateTime<Utc>,
    ) -> Result<TurnId, LedgerError> {
        self.ledger
            .commit_turn(&self.token, user_query, output, timestamp)
            .await
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn other(err: serde_json::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            LedgerError::Storage(tokio_rusqlite::Error::Other(Box::new(e)))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

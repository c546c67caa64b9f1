use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque continuity token grouping a user's turns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Allocate a fresh, globally unique token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a token from the wire if it is well-formed
    /// (1..=128 chars of `[A-Za-z0-9_-]`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation turn identifier. Globally unique and strictly increasing.
pub type TurnId = i64;

// ---------------------------------------------------------------------------
// Tool trace
// ---------------------------------------------------------------------------

/// Result of a single tool invocation as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    Success(serde_json::Value),
    Error { kind: ErrorKind, message: String },
}

impl ToolOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolOutput::Error { kind, .. } => Some(*kind),
            ToolOutput::Success(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: ToolOutput,
}

/// Ordered tool invocations of one turn.
///
/// Serialized as a JSON object keyed `tool_0`, `tool_1`, ... in invocation
/// order. Deserialization orders by the numeric suffix, so `tool_10` sorts
/// after `tool_9` even when the backing map is lexicographic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolTrace(Vec<ToolInvocationRecord>);

impl ToolTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ToolInvocationRecord) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> &[ToolInvocationRecord] {
        &self.0
    }

    /// `(key, record)` pairs in invocation order.
    pub fn entries(&self) -> impl Iterator<Item = (String, &ToolInvocationRecord)> {
        self.0
            .iter()
            .enumerate()
            .map(|(idx, record)| (trace_key(idx), record))
    }
}

impl From<Vec<ToolInvocationRecord>> for ToolTrace {
    fn from(records: Vec<ToolInvocationRecord>) -> Self {
        Self(records)
    }
}

fn trace_key(idx: usize) -> String {
    format!("tool_{idx}")
}

impl Serialize for ToolTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, record) in self.entries() {
            map.serialize_entry(&key, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolTrace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, ToolInvocationRecord>::deserialize(deserializer)?;
        let mut indexed = Vec::with_capacity(raw.len());
        for (key, record) in raw {
            let idx = key
                .strip_prefix("tool_")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| D::Error::custom(format!("unexpected tool trace key `{key}`")))?;
            indexed.push((idx, record));
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(Self(indexed.into_iter().map(|(_, record)| record).collect()))
    }
}

/// Structured assistant output persisted with every turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantOutput {
    pub tools_responses: ToolTrace,
    pub final_assistant_response: String,
}

// ---------------------------------------------------------------------------
// Sessions and turns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A role-tagged message in a session's cumulative history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub turn_id: TurnId,
    pub timestamp: DateTime<Utc>,
    /// Tool trace of the turn; present on assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_responses: Option<ToolTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: SessionToken,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<ChatMessage>,
}

/// One persisted turn. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub turn_id: TurnId,
    pub session_token: SessionToken,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub assistant_output: AssistantOutput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ToolInvocationRecord {
        ToolInvocationRecord {
            tool_name: name.to_string(),
            input: json!({}),
            output: ToolOutput::Success(json!(name)),
        }
    }

    #[test]
    fn trace_keys_follow_invocation_order() {
        let trace: ToolTrace = (0..12).map(|i| record(&format!("t{i}"))).collect::<Vec<_>>().into();
        let text = serde_json::to_string(&trace).unwrap();

        let pos = |needle: &str| text.find(needle).unwrap();
        assert!(pos("\"tool_2\"") < pos("\"tool_10\""));
        assert!(pos("\"tool_9\"") < pos("\"tool_11\""));

        let back: ToolTrace = serde_json::from_str(&text).unwrap();
        let names: Vec<_> = back.records().iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names[10], "t10");
        assert_eq!(names[2], "t2");
    }

    #[test]
    fn trace_rejects_foreign_keys() {
        let err = serde_json::from_value::<ToolTrace>(json!({
            "first": { "tool_name": "x", "input": {}, "output": { "success": null } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn tool_output_error_shape() {
        let out = ToolOutput::Error {
            kind: ErrorKind::BranchNotFound,
            message: "branch `x` not found".into(),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["error"]["kind"], "branch_not_found");
        assert!(out.is_error());
        assert_eq!(out.error_kind(), Some(ErrorKind::BranchNotFound));
    }

    #[test]
    fn session_token_parse() {
        assert!(SessionToken::parse("abc-123_DEF").is_some());
        assert!(SessionToken::parse("").is_none());
        assert!(SessionToken::parse("has space").is_none());
        assert!(SessionToken::parse(&"a".repeat(129)).is_none());
        assert_ne!(SessionToken::generate(), SessionToken::generate());
    }
}

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gha_core::error::ErrorKind;
use thiserror::Error;

use crate::types::{
    DirectoryPage, FileContent, HostUser, NewPullRequest, PullRequestSummary, RepoMetadata,
    RepoName,
};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Caller's access token for the source-control host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Extract the token from an `Authorization: Bearer <token>` value.
    pub fn from_bearer(header: &str) -> Option<Self> {
        header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Self::new)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HostError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by host: {0}")]
    Rejected(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("host API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },
}

impl HostError {
    /// Classify a host response by HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => HostError::Authentication(message),
            403 if message.to_ascii_lowercase().contains("rate limit") => {
                HostError::RateLimited(message)
            }
            403 => HostError::PermissionDenied(message),
            404 => HostError::NotFound(message),
            422 => HostError::Rejected(message),
            429 => HostError::RateLimited(message),
            _ => HostError::Api {
                status: Some(status),
                message,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Authentication(_) => ErrorKind::Authentication,
            HostError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            HostError::NotFound(_) => ErrorKind::NotFound,
            HostError::Rejected(_) => ErrorKind::InvalidInput,
            HostError::RateLimited(_) | HostError::Api { .. } => ErrorKind::ExternalApi,
        }
    }
}

impl From<octocrab::Error> for HostError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                HostError::from_status(source.status_code.as_u16(), source.message.clone())
            }
            other => HostError::Api {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Host boundary
// ---------------------------------------------------------------------------

/// The remote operations the resolver, cache and built-in tools depend on.
///
/// One instance is bound to one caller's credential.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn authenticated_user(&self) -> Result<HostUser, HostError>;

    async fn repository(&self, repo: &RepoName) -> Result<RepoMetadata, HostError>;

    /// `Ok(false)` when the host reports the branch as missing.
    async fn branch_exists(&self, repo: &RepoName, branch: &str) -> Result<bool, HostError>;

    /// List one page (1-based) of a directory. `path` is `""` for the root.
    async fn list_directory(
        &self,
        repo: &RepoName,
        path: &str,
        page: u32,
    ) -> Result<DirectoryPage, HostError>;

    async fn file_content(&self, repo: &RepoName, path: &str) -> Result<FileContent, HostError>;

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        request: &NewPullRequest,
    ) -> Result<PullRequestSummary, HostError>;
}

/// Builds a credential-bound [`RepoHost`].
pub trait HostConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn RepoHost>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(HostError::from_status(401, "x").kind(), ErrorKind::Authentication);
        assert_eq!(HostError::from_status(403, "nope").kind(), ErrorKind::PermissionDenied);
        assert!(matches!(
            HostError::from_status(403, "API rate limit exceeded"),
            HostError::RateLimited(_)
        ));
        assert_eq!(HostError::from_status(404, "x").kind(), ErrorKind::NotFound);
        assert_eq!(HostError::from_status(422, "x").kind(), ErrorKind::InvalidInput);
        assert_eq!(HostError::from_status(502, "x").kind(), ErrorKind::ExternalApi);
    }

    #[test]
    fn bearer_parsing_and_redaction() {
        let c = Credential::from_bearer("Bearer gho_secret").unwrap();
        assert_eq!(c.expose(), "gho_secret");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert!(Credential::from_bearer("Basic abc").is_none());
        assert!(Credential::from_bearer("Bearer   ").is_none());
    }
}

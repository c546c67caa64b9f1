use std::sync::Arc;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;

use crate::host::{Credential, HostConnector, HostError, RepoHost};
use crate::types::{
    DirectoryPage, FileContent, HostUser, NewPullRequest, PullRequestSummary, RepoMetadata,
    RepoName,
};

use super::{pull_requests, repos};

/// [`RepoHost`] backed by the GitHub REST API for one caller's token.
#[derive(Debug, Clone)]
pub struct GitHubHost {
    pub(crate) octocrab: Octocrab,
}

impl GitHubHost {
    /// Create a client for `credential`. `api_base` overrides
    /// `https://api.github.com` (GitHub Enterprise).
    pub fn new(credential: &Credential, api_base: Option<&str>) -> Result<Self, HostError> {
        let mut builder = Octocrab::builder().personal_token(credential.expose().to_string());
        if let Some(base) = api_base {
            builder = builder.base_uri(base)?;
        }
        Ok(Self {
            octocrab: builder.build()?,
        })
    }

    /// Returns a reference to the inner `Octocrab` instance.
    pub fn inner(&self) -> &Octocrab {
        &self.octocrab
    }
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
    id: u64,
    name: Option<String>,
}

#[async_trait]
impl RepoHost for GitHubHost {
    async fn authenticated_user(&self) -> Result<HostUser, HostError> {
        let user: UserPayload = self.octocrab.get("/user", None::<&()>).await?;
        Ok(HostUser {
            login: user.login,
            id: user.id,
            name: user.name,
        })
    }

    async fn repository(&self, repo: &RepoName) -> Result<RepoMetadata, HostError> {
        repos::repository(self, repo).await
    }

    async fn branch_exists(&self, repo: &RepoName, branch: &str) -> Result<bool, HostError> {
        repos::branch_exists(self, repo, branch).await
    }

    async fn list_directory(
        &self,
        repo: &RepoName,
        path: &str,
        page: u32,
    ) -> Result<DirectoryPage, HostError> {
        repos::list_directory(self, repo, path, page).await
    }

    async fn file_content(&self, repo: &RepoName, path: &str) -> Result<FileContent, HostError> {
        repos::file_content(self, repo, path).await
    }

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        request: &NewPullRequest,
    ) -> Result<PullRequestSummary, HostError> {
        pull_requests::create_pull_request(self, repo, request).await
    }
}

/// Connects each request's credential to a fresh [`GitHubHost`].
#[derive(Debug, Clone, Default)]
pub struct GitHubConnector {
    api_base: Option<String>,
}

impl GitHubConnector {
    pub fn new(api_base: Option<String>) -> Self {
        Self { api_base }
    }
}

impl HostConnector for GitHubConnector {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn RepoHost>, HostError> {
        let host = GitHubHost::new(credential, self.api_base.as_deref())?;
        Ok(Arc::new(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connector_builds_client() {
        let connector = GitHubConnector::default();
        assert!(connector.connect(&Credential::new("gho_test")).is_ok());
    }

    #[tokio::test]
    async fn enterprise_base_uri() {
        let host = GitHubHost::new(
            &Credential::new("gho_test"),
            Some("https://ghe.example.com/api/v3"),
        );
        assert!(host.is_ok());
    }
}

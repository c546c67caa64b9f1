//! Head/base repository selection for pull requests involving forks.
//!
//! Decision table, after locating the head branch (named repository first,
//! then the parent if the repository is a fork and the branch is absent):
//!
//! | named repo | head branch found on | head repo | base repo | cross |
//! |------------|----------------------|-----------|-----------|-------|
//! | not a fork | named repo           | named     | named     | no    |
//! | fork       | fork                 | fork      | parent    | yes   |
//! | fork       | parent only          | parent    | parent    | no    |
//! | any        | nowhere              | `BranchNotFound`                  |
//!
//! The base branch must then exist in the chosen base repository.

use gha_core::error::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::{HostError, RepoHost};
use crate::types::RepoName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrTarget {
    pub head_repo: RepoName,
    pub base_repo: RepoName,
    pub head_branch: String,
    pub base_branch: String,
    pub cross_repository: bool,
}

impl PrTarget {
    /// Head reference as the host expects it: `owner:branch` across
    /// repositories, the bare branch otherwise.
    pub fn head_ref(&self) -> String {
        if self.cross_repository {
            format!("{}:{}", self.head_repo.owner(), self.head_branch)
        } else {
            self.head_branch.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("branch `{branch}` not found in {searched}")]
    BranchNotFound { branch: String, searched: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::BranchNotFound { .. } => ErrorKind::BranchNotFound,
            ResolveError::Host(e) => e.kind(),
        }
    }
}

/// Compute where a pull request from `head_branch` into `base_branch`,
/// requested against `repo`, must actually be opened.
pub async fn resolve_pr_target(
    host: &dyn RepoHost,
    repo: &RepoName,
    head_branch: &str,
    base_branch: &str,
) -> Result<PrTarget, ResolveError> {
    let meta = host.repository(repo).await?;
    let parent = if meta.is_fork { meta.parent.clone() } else { None };

    let (head_repo, base_repo, cross_repository) = if host.branch_exists(repo, head_branch).await? {
        match parent {
            Some(parent) => (repo.clone(), parent, true),
            None => (repo.clone(), repo.clone(), false),
        }
    } else {
        match parent {
            Some(parent) if host.branch_exists(&parent, head_branch).await? => {
                (parent.clone(), parent, false)
            }
            Some(parent) => {
                return Err(ResolveError::BranchNotFound {
                    branch: head_branch.to_string(),
                    searched: format!("{repo} or its parent {parent}"),
                });
            }
            None => {
                return Err(ResolveError::BranchNotFound {
                    branch: head_branch.to_string(),
                    searched: repo.to_string(),
                });
            }
        }
    };

    if !host.branch_exists(&base_repo, base_branch).await? {
        return Err(ResolveError::BranchNotFound {
            branch: base_branch.to_string(),
            searched: base_repo.to_string(),
        });
    }

    tracing::debug!(
        requested = %repo,
        head_repo = %head_repo,
        base_repo = %base_repo,
        cross_repository,
        "resolved pull request target"
    );

    Ok(PrTarget {
        head_repo,
        base_repo,
        head_branch: head_branch.to_string(),
        base_branch: base_branch.to_string(),
        cross_repository,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn repo(s: &str) -> RepoName {
        RepoName::parse(s).unwrap()
    }

    fn fork_setup() -> FakeHost {
        let host = FakeHost::new("alice");
        host.add_repo("upstream/demo")
            .add_branch("upstream/demo", "main")
            .add_branch("upstream/demo", "release");
        host.add_fork("alice/demo", "upstream/demo")
            .add_branch("alice/demo", "main");
        host
    }

    #[tokio::test]
    async fn non_fork_targets_itself() {
        let host = FakeHost::new("alice");
        host.add_repo("alice/tool")
            .add_branch("alice/tool", "main")
            .add_branch("alice/tool", "fix");

        let target = resolve_pr_target(&host, &repo("alice/tool"), "fix", "main")
            .await
            .unwrap();
        assert_eq!(target.head_repo, repo("alice/tool"));
        assert_eq!(target.base_repo, repo("alice/tool"));
        assert!(!target.cross_repository);
        assert_eq!(target.head_ref(), "fix");
    }

    #[tokio::test]
    async fn private_non_fork_is_not_special() {
        let host = FakeHost::new("alice");
        host.add_repo("bob/secret")
            .set_private("bob/secret")
            .add_branch("bob/secret", "main")
            .add_branch("bob/secret", "wip");

        let target = resolve_pr_target(&host, &repo("bob/secret"), "wip", "main")
            .await
            .unwrap();
        assert_eq!(target.head_repo, target.base_repo);
        assert!(!target.cross_repository);
    }

    #[tokio::test]
    async fn fork_branch_only_on_fork_is_cross_repository() {
        let host = fork_setup();
        host.add_branch("alice/demo", "feature");

        let target = resolve_pr_target(&host, &repo("alice/demo"), "feature", "main")
            .await
            .unwrap();
        assert_eq!(target.head_repo, repo("alice/demo"));
        assert_eq!(target.base_repo, repo("upstream/demo"));
        assert!(target.cross_repository);
        assert_eq!(target.head_ref(), "alice:feature");
    }

    #[tokio::test]
    async fn fork_branch_on_parent_stays_in_parent() {
        let host = fork_setup();

        let target = resolve_pr_target(&host, &repo("alice/demo"), "release", "main")
            .await
            .unwrap();
        assert_eq!(target.head_repo, repo("upstream/demo"));
        assert_eq!(target.base_repo, repo("upstream/demo"));
        assert!(!target.cross_repository);
        assert_eq!(target.head_ref(), "release");
    }

    #[tokio::test]
    async fn head_branch_missing_everywhere() {
        let host = fork_setup();
        let err = resolve_pr_target(&host, &repo("alice/demo"), "ghost", "main")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BranchNotFound);

        let host = FakeHost::new("alice");
        host.add_repo("alice/tool").add_branch("alice/tool", "main");
        let err = resolve_pr_target(&host, &repo("alice/tool"), "ghost", "main")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::BranchNotFound { ref branch, .. } if branch == "ghost"));
    }

    #[tokio::test]
    async fn base_branch_checked_in_base_repo() {
        let host = fork_setup();
        host.add_branch("alice/demo", "feature")
            .add_branch("alice/demo", "develop");

        // `develop` exists on the fork but the base repo is the parent.
        let err = resolve_pr_target(&host, &repo("alice/demo"), "feature", "develop")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::BranchNotFound { ref branch, .. } if branch == "develop"));
    }

    #[tokio::test]
    async fn unknown_repository_is_host_not_found() {
        let host = FakeHost::new("alice");
        let err = resolve_pr_target(&host, &repo("alice/none"), "a", "b")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

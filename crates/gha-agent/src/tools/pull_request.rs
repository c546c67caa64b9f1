use async_trait::async_trait;
use gha_integrations::fork_resolver::resolve_pr_target;
use gha_integrations::types::NewPullRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolError};

/// Open a pull request, targeting the parent when the repository is a fork.
pub struct CreatePullRequest;

#[derive(Debug, Deserialize)]
pub struct PullRequestArgs {
    pub repo_name: String,
    pub title: String,
    pub head: String,
    /// Defaults to the repository's default branch.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullRequestOutput {
    pub number: u64,
    pub html_url: Option<String>,
    pub head_repo: String,
    pub base_repo: String,
    pub head: String,
    pub base: String,
    pub cross_repository: bool,
    pub draft: bool,
}

#[async_trait]
impl Tool for CreatePullRequest {
    const NAME: &'static str = "create_pull_request";
    type Args = PullRequestArgs;
    type Output = PullRequestOutput;

    fn description(&self) -> &'static str {
        "Create a pull request from `head` into `base`. Works from a fork or its parent: \
         the branch is located and the pull request is opened on the right repository."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_name": { "type": "string", "description": "`owner/repo`, or `repo` for your own" },
                "title": { "type": "string" },
                "head": { "type": "string", "description": "branch with the changes" },
                "base": { "type": "string", "description": "branch to merge into; default branch if omitted" },
                "body": { "type": "string" },
                "draft": { "type": "boolean" }
            },
            "required": ["repo_name", "title", "head"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: PullRequestArgs) -> Result<PullRequestOutput, ToolError> {
        let repo = ctx.repo(&args.repo_name)?;
        if args.title.trim().is_empty() {
            return Err(ToolError::InvalidInput("title must not be empty".into()));
        }

        let base = match args.base.filter(|b| !b.trim().is_empty()) {
            Some(base) => base,
            None => {
                let meta = ctx.host.repository(&repo).await?;
                let upstream = match meta.parent.filter(|_| meta.is_fork) {
                    Some(parent) => ctx.host.repository(&parent).await?.default_branch,
                    None => meta.default_branch,
                };
                upstream.unwrap_or_else(|| "main".to_string())
            }
        };

        let target = resolve_pr_target(ctx.host.as_ref(), &repo, &args.head, &base).await?;
        let request = NewPullRequest {
            title: args.title,
            head: target.head_ref(),
            base: target.base_branch.clone(),
            body: args.body.unwrap_or_default(),
            draft: args.draft,
        };
        let pr = ctx.host.create_pull_request(&target.base_repo, &request).await?;

        Ok(PullRequestOutput {
            number: pr.number,
            html_url: pr.html_url,
            head_repo: target.head_repo.full_name(),
            base_repo: target.base_repo.full_name(),
            head: request.head,
            base: request.base,
            cross_repository: target.cross_repository,
            draft: pr.draft,
        })
    }
}

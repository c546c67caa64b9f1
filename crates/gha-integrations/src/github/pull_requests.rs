use crate::host::HostError;
use crate::types::{NewPullRequest, PullRequestSummary, RepoName};

use super::client::GitHubHost;

/// Open a pull request on `repo` (the base repository).
pub async fn create_pull_request(
    host: &GitHubHost,
    repo: &RepoName,
    request: &NewPullRequest,
) -> Result<PullRequestSummary, HostError> {
    let pr = host
        .octocrab
        .pulls(repo.owner(), repo.name())
        .create(&request.title, &request.head, &request.base)
        .body(&request.body)
        .draft(request.draft)
        .send()
        .await?;

    tracing::info!(repo = %repo, number = pr.number, head = %request.head, "pull request created");

    Ok(PullRequestSummary {
        number: pr.number,
        repo: repo.clone(),
        head: request.head.clone(),
        base: request.base.clone(),
        draft: pr.draft.unwrap_or(request.draft),
        html_url: pr.html_url.map(|u| u.to_string()),
    })
}

use octocrab::params::repos::Reference;

use crate::host::HostError;
use crate::types::{ContentEntry, DirectoryPage, EntryKind, FileContent, RepoMetadata, RepoName};

use super::client::GitHubHost;

/// Fork status, parent and visibility of a repository.
pub async fn repository(host: &GitHubHost, repo: &RepoName) -> Result<RepoMetadata, HostError> {
    let model = host.octocrab.repos(repo.owner(), repo.name()).get().await?;

    let is_fork = model.fork.unwrap_or(false);
    let parent = if is_fork {
        model
            .parent
            .as_ref()
            .and_then(|p| p.full_name.as_deref())
            .map(RepoName::parse)
            .transpose()
            .map_err(|e| HostError::Api {
                status: None,
                message: e.to_string(),
            })?
    } else {
        None
    };

    Ok(RepoMetadata {
        full_name: repo.clone(),
        is_fork,
        parent,
        private: model.private.unwrap_or(false),
        default_branch: model.default_branch,
    })
}

/// Whether `refs/heads/{branch}` exists.
pub async fn branch_exists(
    host: &GitHubHost,
    repo: &RepoName,
    branch: &str,
) -> Result<bool, HostError> {
    let result = host
        .octocrab
        .repos(repo.owner(), repo.name())
        .get_ref(&Reference::Branch(branch.to_string()))
        .await;

    match result {
        Ok(_) => Ok(true),
        Err(err) => match HostError::from(err) {
            HostError::NotFound(_) => Ok(false),
            other => Err(other),
        },
    }
}

/// List a directory via the contents API.
///
/// The contents API answers with the whole directory at once, so page 1
/// carries every entry and there is never a next page.
pub async fn list_directory(
    host: &GitHubHost,
    repo: &RepoName,
    path: &str,
    page: u32,
) -> Result<DirectoryPage, HostError> {
    if page > 1 {
        return Ok(DirectoryPage::default());
    }

    let handler = host.octocrab.repos(repo.owner(), repo.name());
    let mut request = handler.get_content();
    if !path.is_empty() {
        request = request.path(path);
    }
    let items = request.send().await?;

    let entries = items
        .items
        .into_iter()
        .map(|item| ContentEntry {
            kind: if item.r#type == "dir" {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            path: item.path,
            sha: item.sha,
            size: u64::try_from(item.size).unwrap_or(0),
        })
        .collect();

    Ok(DirectoryPage {
        entries,
        next_page: None,
    })
}

/// Fetch and decode a single file.
pub async fn file_content(
    host: &GitHubHost,
    repo: &RepoName,
    path: &str,
) -> Result<FileContent, HostError> {
    let mut items = host
        .octocrab
        .repos(repo.owner(), repo.name())
        .get_content()
        .path(path)
        .send()
        .await?;

    if items.items.len() != 1 || items.items[0].r#type != "file" {
        return Err(HostError::Rejected(format!("`{path}` is not a file")));
    }
    let item = items.items.remove(0);

    Ok(FileContent {
        text: item.decoded_content(),
        size: u64::try_from(item.size).unwrap_or(0),
        download_url: item.download_url.clone(),
        path: item.path,
    })
}

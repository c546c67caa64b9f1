use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Repository names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository name `{0}`: expected `owner/repo`")]
pub struct RepoNameError(pub String);

/// `owner/repo` full name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/repo`. A `https://github.com/` prefix and a `.git`
    /// suffix are tolerated.
    pub fn parse(raw: &str) -> Result<Self, RepoNameError> {
        let trimmed = strip_url(raw.trim());
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if valid_segment(owner) && valid_segment(name) => {
                Ok(Self::new(owner, name))
            }
            _ => Err(RepoNameError(raw.to_string())),
        }
    }

    /// Like [`RepoName::parse`], but a bare `repo` is owned by `default_owner`.
    pub fn qualify(raw: &str, default_owner: &str) -> Result<Self, RepoNameError> {
        let trimmed = strip_url(raw.trim());
        if trimmed.contains('/') {
            Self::parse(trimmed)
        } else if valid_segment(trimmed) && valid_segment(default_owner) {
            Ok(Self::new(default_owner, trimmed))
        } else {
            Err(RepoNameError(raw.to_string()))
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

fn strip_url(raw: &str) -> &str {
    let raw = raw
        .strip_prefix("https://github.com/")
        .or_else(|| raw.strip_prefix("http://github.com/"))
        .unwrap_or(raw);
    let raw = raw.trim_end_matches('/');
    raw.strip_suffix(".git").unwrap_or(raw)
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for RepoName {
    type Error = RepoNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoName> for String {
    fn from(value: RepoName) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Host data
// ---------------------------------------------------------------------------

/// Identity behind a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub login: String,
    pub id: u64,
    pub name: Option<String>,
}

/// Fork-relevant repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub full_name: RepoName,
    pub is_fork: bool,
    /// Set only when `is_fork` is true.
    pub parent: Option<RepoName>,
    pub private: bool,
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// One item of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub path: String,
    pub kind: EntryKind,
    pub sha: String,
    pub size: u64,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    pub entries: Vec<ContentEntry>,
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub size: u64,
    /// UTF-8 text; `None` for binary files.
    pub text: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    /// `branch` or `owner:branch` for cross-repository pull requests.
    pub head: String,
    pub base: String,
    pub body: String,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub repo: RepoName,
    pub head: String,
    pub base: String,
    pub draft: bool,
    pub html_url: Option<String>,
}

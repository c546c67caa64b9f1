//! In-memory [`RepoHost`] for tests in this and downstream crates.
//!
//! Enabled for dependents through the `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::host::{Credential, HostConnector, HostError, RepoHost};
use crate::types::{
    ContentEntry, DirectoryPage, EntryKind, FileContent, HostUser, NewPullRequest,
    PullRequestSummary, RepoMetadata, RepoName,
};

#[derive(Default)]
struct FakeRepo {
    meta: Option<RepoMetadata>,
    branches: BTreeSet<String>,
    /// `None` content marks a binary file.
    files: BTreeMap<String, Option<String>>,
}

struct FakeState {
    user: HostUser,
    repos: BTreeMap<RepoName, FakeRepo>,
    failing_dirs: HashSet<(RepoName, String)>,
    page_size: usize,
    listing_calls: usize,
    pulls: Vec<(RepoName, NewPullRequest)>,
}

/// Repositories, branches and files held in memory, with failure injection.
pub struct FakeHost {
    state: Mutex<FakeState>,
}

fn name(full: &str) -> RepoName {
    RepoName::parse(full).unwrap_or_else(|_| panic!("bad repo name in test setup: {full}"))
}

impl FakeHost {
    pub fn new(login: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                user: HostUser {
                    login: login.to_string(),
                    id: 1,
                    name: None,
                },
                repos: BTreeMap::new(),
                failing_dirs: HashSet::new(),
                page_size: usize::MAX,
                listing_calls: 0,
                pulls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_repo(&self, full: &str, f: impl FnOnce(&mut FakeRepo)) -> &Self {
        let repo = name(full);
        let mut state = self.state();
        let entry = state.repos.entry(repo.clone()).or_default();
        if entry.meta.is_none() {
            entry.meta = Some(RepoMetadata {
                full_name: repo,
                is_fork: false,
                parent: None,
                private: false,
                default_branch: Some("main".into()),
            });
        }
        f(entry);
        drop(state);
        self
    }

    pub fn add_repo(&self, full: &str) -> &Self {
        self.with_repo(full, |_| {})
    }

    pub fn add_fork(&self, fork: &str, parent: &str) -> &Self {
        let parent = name(parent);
        self.with_repo(fork, |r| {
            if let Some(meta) = r.meta.as_mut() {
                meta.is_fork = true;
                meta.parent = Some(parent);
            }
        })
    }

    pub fn set_private(&self, full: &str) -> &Self {
        self.with_repo(full, |r| {
            if let Some(meta) = r.meta.as_mut() {
                meta.private = true;
            }
        })
    }

    pub fn add_branch(&self, full: &str, branch: &str) -> &Self {
        self.with_repo(full, |r| {
            r.branches.insert(branch.to_string());
        })
    }

    pub fn add_file(&self, full: &str, path: &str, content: &str) -> &Self {
        self.with_repo(full, |r| {
            r.files.insert(path.to_string(), Some(content.to_string()));
        })
    }

    pub fn add_binary_file(&self, full: &str, path: &str) -> &Self {
        self.with_repo(full, |r| {
            r.files.insert(path.to_string(), None);
        })
    }

    pub fn remove_file(&self, full: &str, path: &str) -> &Self {
        self.with_repo(full, |r| {
            r.files.remove(path);
        })
    }

    /// Make listings of `dir` (`""` for the root) fail with a 500.
    pub fn fail_listing(&self, full: &str, dir: &str) -> &Self {
        self.state().failing_dirs.insert((name(full), dir.to_string()));
        self
    }

    pub fn clear_failures(&self) -> &Self {
        self.state().failing_dirs.clear();
        self
    }

    pub fn set_page_size(&self, size: usize) -> &Self {
        self.state().page_size = size.max(1);
        self
    }

    pub fn set_user(&self, user: HostUser) -> &Self {
        self.state().user = user;
        self
    }

    pub fn listing_calls(&self) -> usize {
        self.state().listing_calls
    }

    pub fn created_pull_requests(&self) -> Vec<(RepoName, NewPullRequest)> {
        self.state().pulls.clone()
    }
}

fn missing(repo: &RepoName) -> HostError {
    HostError::NotFound(format!("repository {repo}"))
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn authenticated_user(&self) -> Result<HostUser, HostError> {
        Ok(self.state().user.clone())
    }

    async fn repository(&self, repo: &RepoName) -> Result<RepoMetadata, HostError> {
        self.state()
            .repos
            .get(repo)
            .and_then(|r| r.meta.clone())
            .ok_or_else(|| missing(repo))
    }

    async fn branch_exists(&self, repo: &RepoName, branch: &str) -> Result<bool, HostError> {
        let state = self.state();
        let r = state.repos.get(repo).ok_or_else(|| missing(repo))?;
        Ok(r.branches.contains(branch))
    }

    async fn list_directory(
        &self,
        repo: &RepoName,
        path: &str,
        page: u32,
    ) -> Result<DirectoryPage, HostError> {
        let mut state = self.state();
        state.listing_calls += 1;
        if state.failing_dirs.contains(&(repo.clone(), path.to_string())) {
            return Err(HostError::Api {
                status: Some(500),
                message: format!("listing {path} failed"),
            });
        }
        let r = state.repos.get(repo).ok_or_else(|| missing(repo))?;

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut children: BTreeMap<String, ContentEntry> = BTreeMap::new();
        for (file, content) in &r.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => ContentEntry {
                    path: format!("{prefix}{dir}"),
                    kind: EntryKind::Directory,
                    sha: format!("tree-{prefix}{dir}"),
                    size: 0,
                },
                None => ContentEntry {
                    path: file.clone(),
                    kind: EntryKind::File,
                    sha: format!("blob-{file}"),
                    size: content.as_ref().map_or(0, |c| c.len() as u64),
                },
            };
            children.entry(entry.path.clone()).or_insert(entry);
        }
        if !path.is_empty() && children.is_empty() {
            return Err(HostError::NotFound(format!("{repo}/{path}")));
        }

        let size = state.page_size;
        let start = (page.max(1) as usize - 1).saturating_mul(size);
        let all: Vec<ContentEntry> = children.into_values().collect();
        let entries: Vec<ContentEntry> = all.iter().skip(start).take(size).cloned().collect();
        let next_page = (start.saturating_add(size) < all.len()).then_some(page.max(1) + 1);
        Ok(DirectoryPage { entries, next_page })
    }

    async fn file_content(&self, repo: &RepoName, path: &str) -> Result<FileContent, HostError> {
        let state = self.state();
        let r = state.repos.get(repo).ok_or_else(|| missing(repo))?;
        let content = r
            .files
            .get(path)
            .ok_or_else(|| HostError::NotFound(format!("{repo}/{path}")))?;
        Ok(FileContent {
            path: path.to_string(),
            size: content.as_ref().map_or(0, |c| c.len() as u64),
            text: content.clone(),
            download_url: None,
        })
    }

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        request: &NewPullRequest,
    ) -> Result<PullRequestSummary, HostError> {
        let mut state = self.state();
        let r = state.repos.get(repo).ok_or_else(|| missing(repo))?;
        if !r.branches.contains(&request.base) {
            return Err(HostError::Rejected(format!("base {} does not exist", request.base)));
        }
        state.pulls.push((repo.clone(), request.clone()));
        let number = state.pulls.len() as u64;
        Ok(PullRequestSummary {
            number,
            repo: repo.clone(),
            head: request.head.clone(),
            base: request.base.clone(),
            draft: request.draft,
            html_url: Some(format!("https://github.com/{repo}/pull/{number}")),
        })
    }
}

/// Maps credential tokens to fake hosts; unknown tokens fail authentication.
#[derive(Default)]
pub struct FakeConnector {
    hosts: HashMap<String, Arc<FakeHost>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, host: Arc<FakeHost>) -> Self {
        self.hosts.insert(token.to_string(), host);
        self
    }
}

impl HostConnector for FakeConnector {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn RepoHost>, HostError> {
        self.hosts
            .get(credential.expose())
            .map(|h| h.clone() as Arc<dyn RepoHost>)
            .ok_or_else(|| HostError::Authentication("Bad credentials".into()))
    }
}

//! Process-wide repository tree snapshots.
//!
//! A snapshot is built from one full traversal and swapped in wholesale;
//! readers only ever see a complete snapshot. Rebuilds of the same
//! repository are serialized, rebuilds of different repositories run in
//! parallel.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gha_core::error::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::host::{HostError, RepoHost};
use crate::path_match::{find_match, normalize_path};
use crate::types::{EntryKind, RepoName};

pub use crate::path_match::MatchKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub sha: String,
    pub size: u64,
}

/// Flat normalized-path → entry map for one repository.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub repo: RepoName,
    pub entries: BTreeMap<String, TreeEntry>,
    pub built_at: DateTime<Utc>,
}

impl TreeSnapshot {
    pub fn file_count(&self) -> usize {
        self.count(EntryKind::File)
    }

    pub fn dir_count(&self) -> usize {
        self.count(EntryKind::Directory)
    }

    /// File paths in lexicographic order.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::File)
            .map(|(p, _)| p.as_str())
    }

    fn count(&self, kind: EntryKind) -> usize {
        self.entries.values().filter(|e| e.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub path: String,
    pub entry: TreeEntry,
    pub match_kind: MatchKind,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached structure for {0}; build it first")]
    CacheMiss(RepoName),

    #[error("no path in {repo} close enough to `{requested}`")]
    NotFound { repo: RepoName, requested: String },

    #[error("failed to build structure for {repo}: {source}")]
    Build {
        repo: RepoName,
        #[source]
        source: HostError,
    },
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::CacheMiss(_) => ErrorKind::CacheMiss,
            CacheError::NotFound { .. } => ErrorKind::NotFound,
            CacheError::Build { source, .. } => source.kind(),
        }
    }
}

pub struct RepoTreeCache {
    snapshots: DashMap<RepoName, Arc<TreeSnapshot>>,
    rebuilds: DashMap<RepoName, Arc<Mutex<()>>>,
    min_similarity: f64,
}

impl RepoTreeCache {
    pub fn new(min_similarity: f64) -> Self {
        Self {
            snapshots: DashMap::new(),
            rebuilds: DashMap::new(),
            min_similarity,
        }
    }

    /// Traverse the whole tree of `repo` and replace its snapshot.
    ///
    /// On any host failure the partial traversal is dropped and the previous
    /// snapshot, if any, stays in place.
    pub async fn build(
        &self,
        host: &dyn RepoHost,
        repo: &RepoName,
    ) -> Result<Arc<TreeSnapshot>, CacheError> {
        let slot = RebuildSlot::new(&self.rebuilds, repo);
        let _rebuild = slot.lock().await;
        self.rebuild(host, repo).await
    }

    async fn rebuild(
        &self,
        host: &dyn RepoHost,
        repo: &RepoName,
    ) -> Result<Arc<TreeSnapshot>, CacheError> {
        let entries = traverse(host, repo).await.map_err(|source| {
            tracing::warn!(repo = %repo, error = %source, "tree traversal failed; snapshot discarded");
            CacheError::Build {
                repo: repo.clone(),
                source,
            }
        })?;

        let snapshot = Arc::new(TreeSnapshot {
            repo: repo.clone(),
            entries,
            built_at: Utc::now(),
        });
        self.snapshots.insert(repo.clone(), snapshot.clone());
        tracing::info!(
            repo = %repo,
            files = snapshot.file_count(),
            dirs = snapshot.dir_count(),
            "repository structure cached"
        );
        Ok(snapshot)
    }

    /// Look up `requested` in the cached snapshot of `repo`.
    pub fn resolve(&self, repo: &RepoName, requested: &str) -> Result<Resolution, CacheError> {
        let snapshot = self
            .snapshot(repo)
            .ok_or_else(|| CacheError::CacheMiss(repo.clone()))?;
        let normalized = normalize_path(requested);

        let (path, match_kind) = find_match(
            snapshot.entries.keys().map(String::as_str),
            &normalized,
            self.min_similarity,
        )
        .ok_or_else(|| CacheError::NotFound {
            repo: repo.clone(),
            requested: requested.to_string(),
        })?;

        let entry = snapshot.entries.get(path).cloned().ok_or_else(|| CacheError::NotFound {
            repo: repo.clone(),
            requested: requested.to_string(),
        })?;
        tracing::debug!(repo = %repo, requested, resolved = path, ?match_kind, "path resolved");
        Ok(Resolution {
            path: path.to_string(),
            entry,
            match_kind,
        })
    }

    pub fn snapshot(&self, repo: &RepoName) -> Option<Arc<TreeSnapshot>> {
        self.snapshots.get(repo).map(|s| s.value().clone())
    }

    pub fn invalidate(&self, repo: &RepoName) -> bool {
        self.snapshots.remove(repo).is_some()
    }

    pub fn min_similarity(&self) -> f64 {
        self.min_similarity
    }
}

/// One caller's handle on a repository's rebuild lock. The map entry is
/// removed when the last handle goes away, including on cancellation.
struct RebuildSlot<'a> {
    rebuilds: &'a DashMap<RepoName, Arc<Mutex<()>>>,
    repo: &'a RepoName,
    lock: Arc<Mutex<()>>,
}

impl<'a> RebuildSlot<'a> {
    fn new(rebuilds: &'a DashMap<RepoName, Arc<Mutex<()>>>, repo: &'a RepoName) -> Self {
        let lock = rebuilds.entry(repo.clone()).or_default().value().clone();
        Self {
            rebuilds,
            repo,
            lock,
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for RebuildSlot<'_> {
    fn drop(&mut self) {
        // Held by the map and by us only: nobody else is waiting.
        self.rebuilds
            .remove_if(self.repo, |_, lock| Arc::strong_count(lock) == 2);
    }
}

async fn traverse(
    host: &dyn RepoHost,
    repo: &RepoName,
) -> Result<BTreeMap<String, TreeEntry>, HostError> {
    let mut entries = BTreeMap::new();
    let mut pending = VecDeque::from([String::new()]);

    while let Some(dir) = pending.pop_front() {
        let mut page = 1;
        loop {
            let listing = host.list_directory(repo, &dir, page).await?;
            for item in listing.entries {
                let path = normalize_path(&item.path);
                if path.is_empty() {
                    continue;
                }
                if item.kind == EntryKind::Directory && !entries.contains_key(&path) {
                    pending.push_back(path.clone());
                }
                entries.insert(
                    path,
                    TreeEntry {
                        kind: item.kind,
                        sha: item.sha,
                        size: item.size,
                    },
                );
            }
            match listing.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
    }
    Ok(entries)
}

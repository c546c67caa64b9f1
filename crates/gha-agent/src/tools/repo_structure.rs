use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gha_integrations::repo_cache::Resolution;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolError};

/// Traverse a repository once and cache its tree for path resolution.
pub struct CacheRepoStructure;

#[derive(Debug, Deserialize)]
pub struct RepoArgs {
    pub repo_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub repo: String,
    pub files: usize,
    pub directories: usize,
    pub built_at: DateTime<Utc>,
}

#[async_trait]
impl Tool for CacheRepoStructure {
    const NAME: &'static str = "cache_repo_structure";
    type Args = RepoArgs;
    type Output = StructureSummary;

    fn description(&self) -> &'static str {
        "Fetch and cache the complete file tree of a repository so later file lookups \
         can tolerate typos in paths. Rebuilding replaces the previous snapshot."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_name": { "type": "string", "description": "`owner/repo`, or `repo` for your own" }
            },
            "required": ["repo_name"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: RepoArgs) -> Result<StructureSummary, ToolError> {
        let repo = ctx.repo(&args.repo_name)?;
        let snapshot = ctx.cache.build(ctx.host.as_ref(), &repo).await?;
        Ok(StructureSummary {
            repo: repo.full_name(),
            files: snapshot.file_count(),
            directories: snapshot.dir_count(),
            built_at: snapshot.built_at,
        })
    }
}

/// Typo-tolerant lookup of a path in a cached repository tree.
pub struct ResolveRepoPath;

#[derive(Debug, Deserialize)]
pub struct ResolveArgs {
    pub repo_name: String,
    pub path: String,
}

#[async_trait]
impl Tool for ResolveRepoPath {
    const NAME: &'static str = "resolve_repo_path";
    type Args = ResolveArgs;
    type Output = Resolution;

    fn description(&self) -> &'static str {
        "Resolve a possibly misspelled path against the cached tree of a repository. \
         Fails with cache_miss if cache_repo_structure has not been run for it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_name": { "type": "string" },
                "path": { "type": "string", "description": "path as the user wrote it" }
            },
            "required": ["repo_name", "path"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: ResolveArgs) -> Result<Resolution, ToolError> {
        let repo = ctx.repo(&args.repo_name)?;
        ctx.ensure_visible(&repo).await?;
        Ok(ctx.cache.resolve(&repo, &args.path)?)
    }
}

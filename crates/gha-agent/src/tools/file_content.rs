use async_trait::async_trait;
use gha_integrations::host::HostError;
use gha_integrations::path_match::normalize_path;
use gha_integrations::repo_cache::{CacheError, MatchKind};
use gha_integrations::types::{EntryKind, FileContent, RepoName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolError};

/// Longest text returned for one file, in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Cap on the file paths listed when a path cannot be resolved.
const MAX_LISTED_PATHS: usize = 50;

/// Read a file, falling back to the cached tree when the path is wrong.
pub struct GetFileContent;

#[derive(Debug, Deserialize)]
pub struct FileArgs {
    pub repo_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileContentOutput {
    pub repo: String,
    pub path: String,
    /// Set when `path` differs from what was asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<MatchKind>,
    pub size: u64,
    pub binary: bool,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[async_trait]
impl Tool for GetFileContent {
    const NAME: &'static str = "get_file_content";
    type Args = FileArgs;
    type Output = FileContentOutput;

    fn description(&self) -> &'static str {
        "Fetch the text of one file from a repository. If the path does not exist and the \
         repository structure is cached, the closest matching path is used instead."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_name": { "type": "string", "description": "`owner/repo`, or `repo` for your own" },
                "file_path": { "type": "string" }
            },
            "required": ["repo_name", "file_path"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: FileArgs) -> Result<FileContentOutput, ToolError> {
        let repo = ctx.repo(&args.repo_name)?;
        let requested = normalize_path(&args.file_path);

        match ctx.host.file_content(&repo, &requested).await {
            Ok(file) => Ok(render(&repo, file, None)),
            Err(HostError::NotFound(_)) => {
                ctx.ensure_visible(&repo).await?;
                let resolution = match ctx.cache.resolve(&repo, &requested) {
                    Ok(r) if r.entry.kind == EntryKind::File && r.path != requested => r,
                    Ok(_) | Err(CacheError::NotFound { .. }) => {
                        return Err(ToolError::NotFound(not_found_message(ctx, &repo, &requested)));
                    }
                    Err(CacheError::CacheMiss(_)) => {
                        return Err(ToolError::NotFound(format!(
                            "file `{requested}` not found in {repo}; run cache_repo_structure \
                             to enable path suggestions"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };
                tracing::info!(
                    repo = %repo,
                    requested = %requested,
                    resolved = %resolution.path,
                    "retrying file fetch with resolved path"
                );
                let file = ctx.host.file_content(&repo, &resolution.path).await?;
                Ok(render(&repo, file, Some((requested, resolution.match_kind))))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn render(repo: &RepoName, file: FileContent, resolved_from: Option<(String, MatchKind)>) -> FileContentOutput {
    let (requested_path, match_kind) = match resolved_from {
        Some((requested, kind)) => (Some(requested), Some(kind)),
        None => (None, None),
    };
    let binary = file.text.is_none();
    let (content, truncated) = match file.text {
        Some(text) => match text.char_indices().nth(MAX_CONTENT_CHARS) {
            Some((cut, _)) => (Some(text[..cut].to_string()), true),
            None => (Some(text), false),
        },
        None => (None, false),
    };
    FileContentOutput {
        repo: repo.full_name(),
        path: file.path,
        requested_path,
        match_kind,
        size: file.size,
        binary,
        truncated,
        content,
        download_url: if binary { file.download_url } else { None },
    }
}

fn not_found_message(ctx: &ToolContext, repo: &RepoName, requested: &str) -> String {
    let Some(snapshot) = ctx.cache.snapshot(repo) else {
        return format!("file `{requested}` not found in {repo}");
    };
    let total = snapshot.file_count();
    let listed: Vec<&str> = snapshot.file_paths().take(MAX_LISTED_PATHS).collect();
    let mut message = format!(
        "file `{requested}` not found in {repo}. Available files: {}",
        listed.join(", ")
    );
    if total > listed.len() {
        message.push_str(&format!(" (and {} more)", total - listed.len()));
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tool::tests::context;
    use gha_core::error::ErrorKind;
    use gha_integrations::testing::FakeHost;
    use gha_integrations::types::HostUser;

    fn args(repo: &str, path: &str) -> FileArgs {
        FileArgs {
            repo_name: repo.into(),
            file_path: path.into(),
        }
    }

    fn host() -> Arc<FakeHost> {
        let host = FakeHost::new("alice");
        host.add_repo("alice/demo")
            .add_file("alice/demo", "src/main.rs", "fn main() {}")
            .add_file("alice/demo", "docs/README.md", "# Docs")
            .add_binary_file("alice/demo", "logo.png");
        Arc::new(host)
    }

    #[tokio::test]
    async fn exact_path_is_fetched_directly() {
        let ctx = context(host());
        let out = GetFileContent.call(&ctx, args("demo", "./src/main.rs")).await.unwrap();
        assert_eq!(out.path, "src/main.rs");
        assert_eq!(out.content.as_deref(), Some("fn main() {}"));
        assert!(out.requested_path.is_none());
        assert!(!out.binary && !out.truncated);
    }

    #[tokio::test]
    async fn misspelled_path_without_cache_suggests_caching() {
        let ctx = context(host());
        let err = GetFileContent.call(&ctx, args("demo", "src/mian.rs")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("cache_repo_structure"));
    }

    #[tokio::test]
    async fn misspelled_path_resolves_through_cache() {
        let host = host();
        let ctx = context(host.clone());
        ctx.cache.build(host.as_ref(), &RepoName::new("alice", "demo")).await.unwrap();

        let out = GetFileContent.call(&ctx, args("demo", "src/mian.rs")).await.unwrap();
        assert_eq!(out.path, "src/main.rs");
        assert_eq!(out.requested_path.as_deref(), Some("src/mian.rs"));
        assert!(matches!(out.match_kind, Some(MatchKind::Fuzzy { .. })));

        let out = GetFileContent.call(&ctx, args("demo", "readme.md")).await.unwrap();
        assert_eq!(out.path, "docs/README.md");
        assert_eq!(out.match_kind, Some(MatchKind::Suffix));
    }

    #[tokio::test]
    async fn unresolvable_path_lists_known_files() {
        let host = host();
        let ctx = context(host.clone());
        ctx.cache.build(host.as_ref(), &RepoName::new("alice", "demo")).await.unwrap();

        let err = GetFileContent
            .call(&ctx, args("demo", "totally/unrelated.txt"))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("docs/README.md, logo.png, src/main.rs"), "{msg}");
    }

    #[tokio::test]
    async fn cached_tree_is_not_shown_to_callers_without_access() {
        let alice = Arc::new(FakeHost::new("alice"));
        alice
            .add_repo("acme/secret")
            .set_private("acme/secret")
            .add_file("acme/secret", "keys/prod.txt", "hunter2");
        let alice_ctx = context(alice.clone());
        alice_ctx
            .cache
            .build(alice.as_ref(), &RepoName::new("acme", "secret"))
            .await
            .unwrap();

        let bob_ctx = ToolContext {
            host: Arc::new(FakeHost::new("bob")),
            user: HostUser {
                login: "bob".into(),
                id: 2,
                name: None,
            },
            ..alice_ctx.clone()
        };
        let err = GetFileContent
            .call(&bob_ctx, args("acme/secret", "nope.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.to_string().contains("keys/prod.txt"), "{err}");

        let err = GetFileContent
            .call(&bob_ctx, args("acme/secret", "keys/prod.tx"))
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("keys/prod.txt"), "{err}");

        // The owner still gets suggestions from the same snapshot.
        let out = GetFileContent
            .call(&alice_ctx, args("acme/secret", "keys/prod.tx"))
            .await
            .unwrap();
        assert_eq!(out.path, "keys/prod.txt");
    }

    #[tokio::test]
    async fn binary_and_large_files() {
        let host = host();
        host.add_file("alice/demo", "big.txt", &"é".repeat(MAX_CONTENT_CHARS + 5));
        let ctx = context(host);

        let out = GetFileContent.call(&ctx, args("demo", "logo.png")).await.unwrap();
        assert!(out.binary);
        assert!(out.content.is_none());

        let out = GetFileContent.call(&ctx, args("demo", "big.txt")).await.unwrap();
        assert!(out.truncated);
        assert_eq!(out.content.unwrap().chars().count(), MAX_CONTENT_CHARS);
    }
}

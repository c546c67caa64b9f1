//! Built-in tools that carry logic beyond a single host call.

mod file_content;
mod pull_request;
mod repo_structure;
mod user_info;

pub use file_content::{FileContentOutput, GetFileContent, MAX_CONTENT_CHARS};
pub use pull_request::{CreatePullRequest, PullRequestOutput};
pub use repo_structure::{CacheRepoStructure, ResolveRepoPath, StructureSummary};
pub use user_info::{GetUserInfo, UserInfo};

use crate::tool::ToolRegistry;

/// Registry holding every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(GetUserInfo)
        .register(CacheRepoStructure)
        .register(ResolveRepoPath)
        .register(GetFileContent)
        .register(CreatePullRequest);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = builtin_registry();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            [
                "cache_repo_structure",
                "create_pull_request",
                "get_file_content",
                "get_user_info",
                "resolve_repo_path",
            ]
        );
        for spec in registry.specs() {
            assert_eq!(spec.parameters["type"], "object", "{}", spec.name);
        }
    }
}

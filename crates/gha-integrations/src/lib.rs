//! Source-control host integration.
//!
//! - [`host`]: the [`host::RepoHost`] boundary every host call goes through,
//!   plus the error type mapped from host responses.
//! - [`github`]: the octocrab-backed GitHub adapter.
//! - [`fork_resolver`]: picks head/base repositories for a pull request
//!   when forks are involved.
//! - [`repo_cache`] / [`path_match`]: per-repository tree snapshots with
//!   typo-tolerant path lookup.

pub mod fork_resolver;
pub mod github;
pub mod host;
pub mod path_match;
pub mod repo_cache;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

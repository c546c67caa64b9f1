pub mod client;
pub mod pull_requests;
pub mod repos;

pub use client::{GitHubConnector, GitHubHost};

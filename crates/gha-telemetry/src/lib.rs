//! Logging setup and HTTP request correlation for gh-agent.

pub mod logging;
pub mod middleware;

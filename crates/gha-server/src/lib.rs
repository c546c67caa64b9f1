//! HTTP surface of gh-agent.
//!
//! - `GET /` and `GET /health`: liveness.
//! - `POST /agent/query`: run one turn (bearer token = GitHub credential).
//! - `GET /sessions/{token}/history`: a session's persisted turns.

pub mod api_error;
pub mod http_api;

pub use api_error::ApiError;
pub use http_api::{api_router, AppState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Serializable error taxonomy.
///
/// Every layer keeps its own `thiserror` enum; each of them maps onto one of
/// these kinds so tool traces and HTTP responses speak a single vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    NotFound,
    BranchNotFound,
    CacheMiss,
    ExternalApi,
    Persistence,
    PermissionDenied,
    InvalidInput,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BranchNotFound => "branch_not_found",
            ErrorKind::CacheMiss => "cache_miss",
            ErrorKind::ExternalApi => "external_api",
            ErrorKind::Persistence => "persistence",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_matches_display() {
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::BranchNotFound,
            ErrorKind::CacheMiss,
            ErrorKind::ExternalApi,
            ErrorKind::PermissionDenied,
            ErrorKind::Timeout,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}

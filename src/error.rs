// 🚨 Error taxonomy
//
// Only persistence failures block the pipeline. Missing fields, ambiguous
// matches and registry outages are absorbed into classifications, review
// items and session warnings instead of surfacing here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("config error: {0}")]
    Config(String),

    #[error("persistence failure during {operation}: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
    },

    #[error("dealer registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("cannot {action} while session is {from}")]
    InvalidTransition {
        from: String,
        action: &'static str,
    },

    #[error("{count} review item(s) still need a decision")]
    UnresolvedItems { count: usize },

    #[error("unknown review item: {0}")]
    UnknownReviewItem(String),

    #[error("decision '{decision}' is not valid for review item '{item}'")]
    InvalidDecision { item: String, decision: String },

    #[error("mapped dealer not present in snapshot: {0}")]
    UnknownTarget(String),

    #[error("conservation violated: expected {expected} merged funded rows, found {actual}")]
    ConservationViolated { expected: usize, actual: usize },

    #[error("invalid period {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl ReconError {
    /// Wrap a storage error with the operation that failed.
    pub fn persistence(operation: &'static str, err: impl std::fmt::Display) -> Self {
        ReconError::Persistence {
            operation,
            message: err.to_string(),
        }
    }

    /// Persistence failures can be re-issued unchanged; nothing else can.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconError::Persistence { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_is_retryable() {
        let persist = ReconError::persistence("replace_month", "disk I/O error");
        assert!(persist.is_retryable());
        assert_eq!(
            persist.to_string(),
            "persistence failure during replace_month: disk I/O error"
        );

        assert!(!ReconError::RegistryUnavailable("timeout".into()).is_retryable());
        assert!(!ReconError::UnresolvedItems { count: 2 }.is_retryable());
    }
}

// crates/timebank-match/src/error.rs
// Standardized error types for the matching engine

use thiserror::Error;

/// Main error type for the matching engine
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing source error: {0}")]
    ListingSource(String),

    #[error("user source error: {0}")]
    UserSource(String),

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MatchError
pub type Result<T> = std::result::Result<T, MatchError>;

impl From<String> for MatchError {
    fn from(s: String) -> Self {
        MatchError::Other(s)
    }
}

impl MatchError {
    /// True when the failure is a data-unavailable condition that the
    /// facade degrades to a neutral value rather than surfacing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MatchError::NotFound(_))
    }
}

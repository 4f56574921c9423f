use crate::eval::QueryId;
use thiserror::Error;

/// Main error type for rankeval
#[derive(Error, Debug)]
pub enum RankevalError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid cutoff, empty query or candidate sets, mismatched series, ...
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query evaluated without an entry in the relevance judgments
    #[error("No relevance judgments for query {0}")]
    MissingJudgment(QueryId),

    /// Ranking provider failed for a query
    #[error("Ranking provider failed for query {query_id}: {message}")]
    Provider { query_id: QueryId, message: String },

    /// Malformed qrels, queries, run or results input
    #[error("Parse error: {0}")]
    Parse(String),

    /// Batch aborted between queries
    #[error("Evaluation cancelled after {completed} queries")]
    Cancelled { completed: usize },
}

/// Convenient Result type using RankevalError
pub type Result<T> = std::result::Result<T, RankevalError>;

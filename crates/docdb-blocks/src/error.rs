//! Error types for docdb-blocks
//!
//! Per-record conditions (no match, partial update errors, missing match
//! keys) are logged by the blocks and never surface here. What does surface
//! aborts the batch being processed.

use thiserror::Error;

/// Result type alias for block operations
pub type BlockResult<T> = std::result::Result<T, BlockError>;

/// Errors that can occur while configuring or running a block
#[derive(Debug, Error)]
pub enum BlockError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the database failed or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Authentication failed
    #[error("authentication error: {0}")]
    Auth(String),

    /// Database or table not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout waiting for the database
    #[error("timeout: {0}")]
    Timeout(String),

    /// Filter expression could not be evaluated against a signal
    #[error("expression error: {0}")]
    Expression(String),

    /// Query rejected by the database
    #[error("query error: {0}")]
    Query(String),

    /// Database temporarily unavailable
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl BlockError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an expression error
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }
}

impl From<docdb::Error> for BlockError {
    fn from(err: docdb::Error) -> Self {
        use docdb::ErrorCategory;

        let msg = err.to_string();
        match err.category() {
            ErrorCategory::Connection => Self::Connection(msg),
            ErrorCategory::Timeout => Self::Timeout(msg),
            ErrorCategory::Unavailable => Self::Unavailable(msg),
            ErrorCategory::Authentication => Self::Auth(msg),
            ErrorCategory::Configuration => Self::Config(msg),
            ErrorCategory::Schema => Self::NotFound(msg),
            ErrorCategory::Query => Self::Query(msg),
            ErrorCategory::Other => Self::Internal(msg),
        }
    }
}

impl From<validator::ValidationErrors> for BlockError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(format!("Validation failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(BlockError::Connection("refused".to_string()).is_retryable());
        assert!(BlockError::Timeout("20s".to_string()).is_retryable());
        assert!(BlockError::Unavailable("replica lagging".to_string()).is_retryable());
        assert!(!BlockError::Config("bad table".to_string()).is_retryable());
        assert!(!BlockError::Expression("missing field".to_string()).is_retryable());
    }

    #[test]
    fn test_from_docdb_error() {
        let err: BlockError = docdb::Error::connection("refused").into();
        assert!(matches!(err, BlockError::Connection(_)));
        assert!(err.is_retryable());

        let err: BlockError = docdb::Error::TableNotFound {
            table: "test.users".into(),
        }
        .into();
        assert!(matches!(err, BlockError::NotFound(_)));
        assert!(!err.is_retryable());

        let err: BlockError = docdb::Error::unavailable("primary not ready").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = BlockError::expression("field `email` not found in signal");
        assert_eq!(
            err.to_string(),
            "expression error: field `email` not found in signal"
        );
    }
}

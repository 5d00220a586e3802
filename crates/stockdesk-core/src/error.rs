//! Error types for the data and strategy core.
//!
//! This module defines [`DeskError`], which covers every failure the core can
//! report: provider outages, schema problems in fetched data, local storage
//! failures and strategy evaluation errors.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while loading, caching or evaluating data.
#[derive(Error, Debug)]
pub enum DeskError {
    /// The external provider could not deliver the dataset.
    ///
    /// Transient. The loader degrades to a stale cached entry when one exists.
    #[error("Source unavailable for {dataset}: {reason}")]
    SourceUnavailable {
        /// Dataset that was being fetched.
        dataset: String,
        /// Underlying cause.
        reason: String,
    },

    /// Fetched or merged data does not match the declared schema.
    ///
    /// The cache is left untouched when this is returned.
    #[error("Schema violation in {dataset}: {reason}")]
    SchemaViolation {
        /// Dataset whose data was rejected.
        dataset: String,
        /// What did not match.
        reason: String,
    },

    /// The local cache medium failed (disk full, permission denied, corrupt entry).
    #[error("Storage failure for {dataset}: {reason}")]
    StorageFailure {
        /// Dataset being read or written.
        dataset: String,
        /// Underlying cause.
        reason: String,
    },

    /// A strategy definition failed while selecting securities.
    #[error("Strategy {strategy} failed on {date}: {reason}")]
    StrategyEvaluationFailure {
        /// Name of the failing strategy.
        strategy: String,
        /// Rebalance date being evaluated when it failed.
        date: NaiveDate,
        /// Failure reported by the strategy.
        reason: String,
    },

    /// The requested dataset is neither cached nor obtainable.
    #[error("Dataset not found: {0}")]
    NotFound(String),

    /// No strategy is registered under the requested name.
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// Authentication failed for a provider.
    #[error("Authentication failed for provider {0}")]
    AuthenticationFailed(String),

    /// Error parsing data from a provider.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeskError {
    /// Builds a [`DeskError::SchemaViolation`].
    pub fn schema(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`DeskError::StorageFailure`].
    pub fn storage(dataset: impl Into<String>, reason: impl ToString) -> Self {
        Self::StorageFailure {
            dataset: dataset.into(),
            reason: reason.to_string(),
        }
    }

    /// Builds a [`DeskError::SourceUnavailable`].
    pub fn source(dataset: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            dataset: dataset.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that originate at the external provider.
    ///
    /// These are the failures the loader answers with a stale fallback.
    #[must_use]
    pub const fn is_source_failure(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::Network(_)
                | Self::RateLimited { .. }
                | Self::AuthenticationFailed(_)
                | Self::Parse(_)
        )
    }
}

/// Result type alias using [`DeskError`].
pub type Result<T> = std::result::Result<T, DeskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_failure_classification() {
        assert!(DeskError::source("prices", "timeout").is_source_failure());
        assert!(DeskError::Network("reset".into()).is_source_failure());
        assert!(
            DeskError::RateLimited {
                provider: "rest".into(),
                retry_after: None
            }
            .is_source_failure()
        );
        assert!(!DeskError::schema("prices", "bad column").is_source_failure());
        assert!(!DeskError::storage("prices", "disk full").is_source_failure());
    }

    #[test]
    fn test_strategy_failure_names_date() {
        let err = DeskError::StrategyEvaluationFailure {
            strategy: "value".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "Strategy value failed on 2024-03-01: boom");
    }
}
